use std::fs;
use std::path::Path;

use common::cluster::ClusterConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "scale.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Prefix for every container and network name
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Address block the cluster network is created with
    #[serde(default = "default_cidr")]
    pub cidr: String,
    #[serde(default = "default_node_image")]
    pub node_image: String,
    #[serde(default = "default_bootnode_image")]
    pub bootnode_image: String,
    #[serde(default = "default_rendezvous_image")]
    pub rendezvous_image: String,
    /// Default log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Leave the cluster running after a scenario
    #[serde(default)]
    pub keep: bool,
}

fn default_prefix() -> String {
    ClusterConfig::default().prefix
}

fn default_cidr() -> String {
    "10.0.170.0/24".to_string()
}

fn default_node_image() -> String {
    ClusterConfig::default().node_image
}

fn default_bootnode_image() -> String {
    ClusterConfig::default().bootnode_image
}

fn default_rendezvous_image() -> String {
    ClusterConfig::default().rendezvous_image
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            cidr: default_cidr(),
            node_image: default_node_image(),
            bootnode_image: default_bootnode_image(),
            rendezvous_image: default_rendezvous_image(),
            log_level: default_log_level(),
            keep: false,
        }
    }
}

impl AppConfig {
    /// Write `self` to a new config file at `path`
    pub fn init(&self, path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::AlreadyInitialized(path.display().to_string()));
        }
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_toml = fs::read_to_string(path)?;
        Ok(toml::from_str(&config_toml)?)
    }

    /// The config at `path`, or the defaults when there is no file
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            prefix: self.prefix.clone(),
            node_image: self.node_image.clone(),
            bootnode_image: self.bootnode_image.clone(),
            rendezvous_image: self.rendezvous_image.clone(),
            keep: self.keep,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config already exists at {0}")]
    AlreadyInitialized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = AppConfig {
            prefix: "ci".to_string(),
            keep: true,
            ..Default::default()
        };

        config.init(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
        assert!(matches!(
            config.init(&path),
            Err(ConfigError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: AppConfig = toml::from_str("prefix = \"nightly\"\n").unwrap();
        assert_eq!(config.prefix, "nightly");
        assert_eq!(config.cidr, "10.0.170.0/24");
        assert_eq!(config.log_level, "info");
        assert!(!config.keep);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_cluster_config() {
        let config = AppConfig {
            node_image: "statusd:dev".to_string(),
            ..Default::default()
        };
        let cluster = config.cluster_config();
        assert_eq!(cluster.node_image, "statusd:dev");
        assert_eq!(cluster.prefix, "tests");
    }
}
