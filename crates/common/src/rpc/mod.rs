//! Control plane of a running node.
//!
//! The cluster only needs a handful of calls from a node: who it is, who
//! it is connected to, a way to force a history resync and its raw metrics.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::PortBinding;

mod json_rpc;

pub use json_rpc::{JsonRpcClient, JsonRpcConnector};

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("failed to decode rpc response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("rpc call {0} returned no result")]
    EmptyResult(String),
    #[error("rpc call timed out")]
    Timeout,
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePorts {
    #[serde(default)]
    pub discovery: u16,
    #[serde(default)]
    pub listener: u16,
}

/// Identity and listen address a node reports about itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enode: String,
    #[serde(rename = "listenAddr", default)]
    pub listen_addr: String,
    #[serde(default)]
    pub ports: NodePorts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNetwork {
    #[serde(rename = "localAddress", default)]
    pub local_address: String,
    #[serde(rename = "remoteAddress", default)]
    pub remote_address: String,
}

/// A connection as seen by the node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network: PeerNetwork,
}

impl PeerInfo {
    /// Remote IP of the connection, without the port
    pub fn remote_ip(&self) -> &str {
        self.network
            .remote_address
            .rsplit_once(':')
            .map(|(ip, _)| ip)
            .unwrap_or(&self.network.remote_address)
    }
}

#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync + std::fmt::Debug {
    async fn peers(&self) -> Result<Vec<PeerInfo>, ControlPlaneError>;

    async fn node_info(&self) -> Result<NodeInfo, ControlPlaneError>;

    /// Ask the node to fetch its full message history again
    async fn request_all_history(&self) -> Result<(), ControlPlaneError>;

    /// Metrics snapshot as returned by the node, undecoded
    async fn raw_metrics(&self) -> Result<Vec<u8>, ControlPlaneError>;
}

/// Opens a control plane connection to a published container port
#[async_trait::async_trait]
pub trait ControlPlaneConnector: Send + Sync + std::fmt::Debug {
    async fn connect(
        &self,
        binding: &PortBinding,
    ) -> Result<Arc<dyn ControlPlane>, ControlPlaneError>;
}
