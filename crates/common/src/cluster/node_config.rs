use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::Serialize;

use super::peer::LISTEN_PORT;

pub const DEFAULT_MAILSERVER_PASSWORD: &str = "status-offline-inbox";

const DATA_DIR: &str = "/status-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicLimits {
    pub min: u32,
    pub max: u32,
}

impl TopicLimits {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

/// What the orchestrator decides about a node before it is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub name: String,
    pub net_id: String,
    pub ip: Ipv4Addr,
    pub image: String,

    pub mailserver: bool,
    pub modules: Vec<String>,
    pub whisper: bool,
    pub boot_nodes: Vec<String>,
    pub rendezvous_nodes: Vec<String>,
    pub mailservers: Vec<String>,
    pub network_id: u64,
    pub http: bool,
    /// RPC port inside the container, published on the host
    pub port: u16,
    pub host: String,
    pub metrics: bool,
    pub topic_search: BTreeMap<String, TopicLimits>,
    pub topic_register: Vec<String>,
    pub discovery: bool,
    pub standalone: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            net_id: String::new(),
            ip: Ipv4Addr::UNSPECIFIED,
            image: String::new(),
            mailserver: false,
            modules: ["admin", "debug", "shh", "net", "ssm"]
                .into_iter()
                .map(String::from)
                .collect(),
            whisper: true,
            boot_nodes: Vec::new(),
            rendezvous_nodes: Vec::new(),
            mailservers: Vec::new(),
            network_id: 100,
            http: true,
            port: 8545,
            host: "0.0.0.0".to_string(),
            metrics: true,
            topic_search: BTreeMap::new(),
            topic_register: Vec::new(),
            discovery: true,
            standalone: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeClusterConfig {
    pub enabled: bool,
    pub boot_nodes: Vec<String>,
    pub rendezvous_nodes: Vec<String>,
    pub trusted_mail_servers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WhisperConfig {
    pub enabled: bool,
    pub enable_mail_server: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_server_password: Option<String>,
}

/// Configuration file read by the node binary, mounted into its container
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeConfig {
    #[serde(rename = "NetworkId")]
    pub network_id: u64,
    pub data_dir: String,
    pub listen_addr: String,
    pub log_enabled: bool,
    pub log_level: String,
    pub log_to_stderr: bool,
    #[serde(rename = "HTTPEnabled")]
    pub http_enabled: bool,
    #[serde(rename = "HTTPHost")]
    pub http_host: String,
    #[serde(rename = "HTTPPort")]
    pub http_port: u16,
    #[serde(rename = "APIModules")]
    pub api_modules: String,
    pub enable_metrics: bool,
    pub no_discovery: bool,
    pub rendezvous: bool,
    pub standalone: bool,
    pub cluster_config: NodeClusterConfig,
    pub whisper_config: WhisperConfig,
    pub register_topics: Vec<String>,
    pub require_topics: BTreeMap<String, TopicLimits>,
}

impl PeerConfig {
    /// Render the file the node is started with
    pub fn node_config(&self) -> NodeConfig {
        let whisper_config = if self.whisper && self.mailserver {
            WhisperConfig {
                enabled: true,
                enable_mail_server: true,
                data_dir: Some(format!("{}/mail", DATA_DIR)),
                mail_server_password: Some(DEFAULT_MAILSERVER_PASSWORD.to_string()),
            }
        } else {
            WhisperConfig {
                enabled: self.whisper,
                ..Default::default()
            }
        };

        NodeConfig {
            network_id: self.network_id,
            data_dir: DATA_DIR.to_string(),
            listen_addr: format!("{}:{}", self.ip, LISTEN_PORT),
            log_enabled: true,
            log_level: "INFO".to_string(),
            log_to_stderr: true,
            http_enabled: self.http,
            http_host: self.host.clone(),
            http_port: self.port,
            api_modules: self.modules.join(","),
            enable_metrics: self.metrics,
            // nodes only discover peers when they have somewhere to start from
            no_discovery: !self.discovery || self.boot_nodes.is_empty(),
            rendezvous: !self.rendezvous_nodes.is_empty(),
            standalone: self.standalone,
            cluster_config: NodeClusterConfig {
                enabled: true,
                boot_nodes: self.boot_nodes.clone(),
                rendezvous_nodes: self.rendezvous_nodes.clone(),
                trusted_mail_servers: self.mailservers.clone(),
            },
            whisper_config,
            register_topics: self.topic_register.clone(),
            require_topics: self.topic_search.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_json() {
        let config = PeerConfig {
            name: "tests_relay_0".to_string(),
            ip: Ipv4Addr::new(10, 0, 170, 4),
            boot_nodes: vec!["enode://aa@10.0.170.2:30404".to_string()],
            topic_search: BTreeMap::from([("whisper".to_string(), TopicLimits::new(5, 7))]),
            topic_register: vec!["whisper".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(config.node_config()).unwrap();

        assert_eq!(json["ListenAddr"], "10.0.170.4:30303");
        assert_eq!(json["HTTPPort"], 8545);
        assert_eq!(json["APIModules"], "admin,debug,shh,net,ssm");
        assert_eq!(json["NoDiscovery"], false);
        assert_eq!(json["Rendezvous"], false);
        assert_eq!(json["ClusterConfig"]["BootNodes"][0], "enode://aa@10.0.170.2:30404");
        assert_eq!(json["RequireTopics"]["whisper"]["Min"], 5);
        assert_eq!(json["RequireTopics"]["whisper"]["Max"], 7);
        assert_eq!(json["WhisperConfig"]["EnableMailServer"], false);
        assert!(json["WhisperConfig"].get("MailServerPassword").is_none());
    }

    #[test]
    fn test_mailserver_config() {
        let config = PeerConfig {
            mailserver: true,
            ..Default::default()
        };
        let node = config.node_config();
        assert!(node.whisper_config.enable_mail_server);
        assert_eq!(
            node.whisper_config.mail_server_password.as_deref(),
            Some(DEFAULT_MAILSERVER_PASSWORD)
        );
        // no bootnodes, no discovery
        assert!(node.no_discovery);
    }

    #[test]
    fn test_rendezvous_enables_rendezvous_discovery() {
        let config = PeerConfig {
            rendezvous_nodes: vec!["/ip4/10.0.170.3/tcp/30404/ethv4/bb".to_string()],
            ..Default::default()
        };
        assert!(config.node_config().rendezvous);
    }
}
