pub use clap::Parser;

use std::path::PathBuf;

use crate::config::CONFIG_FILE_NAME;

#[derive(Parser, Debug)]
#[command(name = "scale")]
#[command(about = "Provision and exercise a containerized p2p test cluster")]
pub struct Args {
    /// Path to the scale config file
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config_path: PathBuf,

    /// Log level, overrides the config file (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: crate::Command,
}
