use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempPath;

use crate::backend::{Backend, CreateOpts, IpAssignment};
use crate::rpc::{ControlPlane, ControlPlaneConnector, ControlPlaneError, NodeInfo};

use super::{EntityError, PeerConfig};

/// Where the node config is mounted inside the container
pub const CONTAINER_CONFIG: &str = "/conf.json";
/// devp2p listener port inside the container
pub const LISTEN_PORT: u16 = 30303;

const HEALTHCHECK_RETRIES: usize = 20;
const HEALTHCHECK_INTERVAL: Duration = Duration::from_secs(1);
const HEALTHCHECK_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct PeerState {
    client: Option<Arc<dyn ControlPlane>>,
    enode: Option<String>,
    host_config: Option<TempPath>,
}

/// A node running the full stack, reachable over its RPC port
#[derive(Debug)]
pub struct Peer {
    base_cmd: Vec<String>,
    config: PeerConfig,
    backend: Arc<dyn Backend>,
    connector: Arc<dyn ControlPlaneConnector>,
    state: Mutex<PeerState>,
}

impl Peer {
    pub fn new(
        config: PeerConfig,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn ControlPlaneConnector>,
        cmd: Vec<String>,
    ) -> Self {
        Self {
            base_cmd: cmd,
            config,
            backend,
            connector,
            state: Mutex::new(PeerState::default()),
        }
    }

    /// Plain node daemon, used for relays and mailservers
    pub fn statusd(
        config: PeerConfig,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn ControlPlaneConnector>,
    ) -> Self {
        let cmd = vec![
            "statusd".to_string(),
            "-c".to_string(),
            CONTAINER_CONFIG.to_string(),
        ];
        Self::new(config, backend, connector, cmd)
    }

    pub fn uid(&self) -> &str {
        &self.config.name
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.config.ip
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn command(&self) -> &[String] {
        &self.base_cmd
    }

    /// Address learnt from the node during its last healthcheck
    pub fn enode(&self) -> Option<String> {
        self.state.lock().enode.clone()
    }

    pub fn client(&self) -> Option<Arc<dyn ControlPlane>> {
        self.state.lock().client.clone()
    }

    pub fn control_plane(&self) -> Result<Arc<dyn ControlPlane>, EntityError> {
        self.client()
            .ok_or_else(|| EntityError::NotConnected(self.uid().to_string()))
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub async fn create(&self) -> Result<(), EntityError> {
        let host_config = self.write_host_config()?;
        let host_path = host_config.to_path_buf();
        // kept around (and cleaned up by remove) even if the create fails
        self.state.lock().host_config = Some(host_config);

        tracing::debug!(
            "create peer {} with `{}`, config {}",
            self.uid(),
            self.base_cmd.join(" "),
            host_path.display()
        );
        let mut ports = Vec::new();
        if self.config.http && self.config.port != 0 {
            ports.push(self.config.port);
        }
        self.backend
            .create(
                self.uid(),
                CreateOpts {
                    image: self.config.image.clone(),
                    entrypoint: None,
                    cmd: self.base_cmd.clone(),
                    ports,
                    ip: Some(IpAssignment {
                        net_id: self.config.net_id.clone(),
                        ip: self.config.ip,
                    }),
                    host_config_path: Some(host_path),
                    container_config_path: Some(CONTAINER_CONFIG.to_string()),
                },
            )
            .await?;
        self.connect_and_check().await
    }

    pub async fn remove(&self) -> Result<(), EntityError> {
        tracing::debug!("removing peer {}", self.uid());
        let host_config = self.state.lock().host_config.take();
        if let Some(path) = host_config {
            let shown = path.display().to_string();
            if let Err(e) = path.close() {
                tracing::error!("error removing config file {} on host: {}", shown, e);
            }
        }
        self.backend.remove(self.uid()).await?;
        Ok(())
    }

    pub async fn reboot(&self) -> Result<(), EntityError> {
        tracing::debug!("reboot peer {}", self.uid());
        self.backend.reboot(self.uid()).await?;
        self.connect_and_check().await
    }

    pub async fn raw_metrics(&self) -> Result<Vec<u8>, EntityError> {
        let data = self.control_plane()?.raw_metrics().await?;
        tracing::trace!(
            "fetched metrics from {}: {}",
            self.uid(),
            String::from_utf8_lossy(&data)
        );
        Ok(data)
    }

    pub async fn request_all_history(&self) -> Result<(), EntityError> {
        self.control_plane()?.request_all_history().await?;
        Ok(())
    }

    fn write_host_config(&self) -> Result<TempPath, EntityError> {
        let bytes = serde_json::to_vec(&self.config.node_config())?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("scale-peer-{}-", self.uid()))
            .tempfile()?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file.into_temp_path())
    }

    async fn connect_and_check(&self) -> Result<(), EntityError> {
        let client = self.connect().await?;
        self.state.lock().client = Some(client.clone());
        self.healthcheck(client.as_ref(), HEALTHCHECK_RETRIES, HEALTHCHECK_INTERVAL)
            .await
    }

    async fn connect(&self) -> Result<Arc<dyn ControlPlane>, EntityError> {
        let bindings = self
            .backend
            .connection_info(self.uid(), self.config.port)
            .await?;
        for binding in &bindings {
            tracing::debug!("host port for {}: {}", self.uid(), binding.host_port);
        }
        // any binding will do
        let binding = bindings
            .first()
            .ok_or_else(|| EntityError::NoBindings(self.uid().to_string()))?;
        Ok(self.connector.connect(binding).await?)
    }

    async fn healthcheck(
        &self,
        client: &dyn ControlPlane,
        retries: usize,
        interval: Duration,
    ) -> Result<(), EntityError> {
        tracing::debug!("running healthcheck for {}", self.uid());
        for attempt in 1..=retries {
            let info = tokio::time::timeout(HEALTHCHECK_ATTEMPT_TIMEOUT, client.node_info())
                .await
                .unwrap_or(Err(ControlPlaneError::Timeout));
            match info {
                Ok(info) => {
                    let enode = self.enode_from(&info)?;
                    tracing::debug!("received enode for {}: {}", self.uid(), enode);
                    self.state.lock().enode = Some(enode);
                    return Ok(());
                }
                Err(e) => {
                    tracing::trace!("healthcheck of {} attempt {}: {}", self.uid(), attempt, e);
                    tokio::time::sleep(interval).await;
                }
            }
        }
        Err(EntityError::HealthCheck(self.uid().to_string()))
    }

    /// The node can't learn its external address and reports loopback,
    ///  so the enode is rebuilt around the configured listen address.
    fn enode_from(&self, info: &NodeInfo) -> Result<String, EntityError> {
        let pubkey = info
            .enode
            .strip_prefix("enode://")
            .and_then(|rest| rest.split_once('@'))
            .map(|(pubkey, _)| pubkey)
            .filter(|pubkey| !pubkey.is_empty())
            .ok_or_else(|| EntityError::InvalidEnode(info.enode.clone()))?;
        let ip = info
            .listen_addr
            .rsplit_once(':')
            .and_then(|(ip, _)| ip.parse::<Ipv4Addr>().ok())
            .filter(|ip| !ip.is_unspecified())
            .unwrap_or(self.config.ip);
        let listener = match info.ports.listener {
            0 => LISTEN_PORT,
            port => port,
        };

        let mut enode = format!("enode://{}@{}:{}", pubkey, ip, listener);
        let discovery = info.ports.discovery;
        if discovery != 0 && discovery != listener {
            enode.push_str(&format!("?discport={}", discovery));
        }
        Ok(enode)
    }
}
