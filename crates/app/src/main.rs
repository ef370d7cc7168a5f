mod args;
mod config;
mod docker;
mod logging;
mod op;
mod ops;

use args::Args;
use clap::{Parser, Subcommand};
use config::AppConfig;
use op::Op;
use ops::{Init, Run, Version};

command_enum! {
    (Init, Init),
    (Run, Run),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = args.log_level.clone().unwrap_or_else(|| {
        AppConfig::load_or_default(&args.config_path)
            .map(|config| config.log_level)
            .unwrap_or_else(|_| "info".to_string())
    });
    // flushes buffered log lines when dropped
    let guard = match logging::init(&level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = op::OpContext::new(args.config_path);
    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            shutdown.cancel();
        }
    });

    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    drop(guard);
    std::process::exit(code);
}
