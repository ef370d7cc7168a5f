use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::backend::PortBinding;
use crate::rpc::{
    ControlPlane, ControlPlaneConnector, ControlPlaneError, NodeInfo, NodePorts, PeerInfo,
};

#[derive(Debug, Default)]
struct State {
    unhealthy: bool,
    stalled: bool,
    peers: Vec<PeerInfo>,
    metrics: Option<Value>,
    resync_failures: usize,
    resync_calls: usize,
}

/// Scriptable stand-in for one node's control plane
#[derive(Debug)]
pub struct MemoryControlPlane {
    name: String,
    state: Mutex<State>,
}

impl MemoryControlPlane {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node id, derived from the name so it is stable across runs
    pub fn id(&self) -> String {
        hex::encode(self.name.as_bytes())
    }

    /// Fail node info requests, which fails healthchecks
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.state.lock().unhealthy = unhealthy;
    }

    /// Never answer node info requests
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    pub fn set_peers(&self, peers: Vec<PeerInfo>) {
        self.state.lock().peers = peers;
    }

    pub fn set_metrics(&self, metrics: Value) {
        self.state.lock().metrics = Some(metrics);
    }

    /// Fail the next `n` history requests
    pub fn fail_resync(&self, n: usize) {
        self.state.lock().resync_failures = n;
    }

    /// History requests received, failed ones included
    pub fn resync_calls(&self) -> usize {
        self.state.lock().resync_calls
    }
}

#[async_trait::async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn peers(&self) -> Result<Vec<PeerInfo>, ControlPlaneError> {
        Ok(self.state.lock().peers.clone())
    }

    async fn node_info(&self) -> Result<NodeInfo, ControlPlaneError> {
        let stalled = self.state.lock().stalled;
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.state.lock().unhealthy {
            return Err(ControlPlaneError::Unavailable(format!(
                "{} is not responding",
                self.name
            )));
        }
        Ok(NodeInfo {
            id: self.id(),
            name: self.name.clone(),
            // nodes only know their loopback address
            enode: format!("enode://{}@127.0.0.1:30303", self.id()),
            listen_addr: "[::]:30303".to_string(),
            ports: NodePorts {
                discovery: 30303,
                listener: 30303,
            },
        })
    }

    async fn request_all_history(&self) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock();
        state.resync_calls += 1;
        if state.resync_failures > 0 {
            state.resync_failures -= 1;
            return Err(ControlPlaneError::Unavailable(
                "no mailserver available".to_string(),
            ));
        }
        Ok(())
    }

    async fn raw_metrics(&self) -> Result<Vec<u8>, ControlPlaneError> {
        let state = self.state.lock();
        let metrics = match &state.metrics {
            Some(metrics) => metrics.clone(),
            None => serde_json::json!({ "p2p": { "Peers": state.peers.len() } }),
        };
        Ok(serde_json::to_vec(&metrics)?)
    }
}

/// Connects to the [`MemoryControlPlane`] of the container a binding
///  belongs to, creating it on first use
#[derive(Debug, Default)]
pub struct MemoryConnector {
    planes: Mutex<BTreeMap<String, Arc<MemoryControlPlane>>>,
    connections: Mutex<usize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control plane of container `name`
    pub fn plane(&self, name: &str) -> Arc<MemoryControlPlane> {
        self.planes
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryControlPlane::new(name)))
            .clone()
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock()
    }
}

#[async_trait::async_trait]
impl ControlPlaneConnector for MemoryConnector {
    async fn connect(
        &self,
        binding: &PortBinding,
    ) -> Result<Arc<dyn ControlPlane>, ControlPlaneError> {
        *self.connections.lock() += 1;
        Ok(self.plane(&binding.host_ip))
    }
}
