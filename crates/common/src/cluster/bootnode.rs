use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::backend::{Backend, CreateOpts, IpAssignment};
use crate::crypto::{PublicKey, SecretKey};

use super::EntityError;

/// Port bootnodes (and rendezvous nodes) listen on
pub const BOOTNODE_PORT: u16 = 30404;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootnodeConfig {
    pub name: String,
    pub ip: Ipv4Addr,
    pub net_id: String,
    pub image: String,
    /// other bootnodes this one connects to on start
    pub enodes: Vec<String>,
}

/// Discovery seed with a key generated up front, so its enode is
///  known before the container exists.
#[derive(Debug)]
pub struct Bootnode {
    config: BootnodeConfig,
    port: u16,
    key: SecretKey,
    backend: Arc<dyn Backend>,
}

impl Bootnode {
    pub fn new(config: BootnodeConfig, backend: Arc<dyn Backend>) -> Self {
        Self::with_key(config, SecretKey::generate(), backend)
    }

    pub fn with_key(config: BootnodeConfig, key: SecretKey, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            port: BOOTNODE_PORT,
            key,
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.config.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &BootnodeConfig {
        &self.config
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public()
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.key
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Address other nodes use to reach this bootnode
    pub fn self_addr(&self) -> String {
        format!(
            "enode://{}@{}:{}?discport={}",
            self.key.public().node_id(),
            self.config.ip,
            self.port,
            self.port
        )
    }

    pub fn command(&self) -> Vec<String> {
        let mut cmd = vec![
            format!("-addr={}:{}", self.config.ip, self.port),
            format!("-keydata={}", self.key.to_hex()),
        ];
        if !self.config.enodes.is_empty() {
            cmd.push(format!("-n={}", self.config.enodes.join(",")));
        }
        cmd
    }

    pub(crate) fn create_opts(&self, entrypoint: &str, cmd: Vec<String>) -> CreateOpts {
        CreateOpts {
            image: self.config.image.clone(),
            entrypoint: Some(entrypoint.to_string()),
            cmd,
            ip: Some(IpAssignment {
                net_id: self.config.net_id.clone(),
                ip: self.config.ip,
            }),
            ..Default::default()
        }
    }

    pub async fn create(&self) -> Result<(), EntityError> {
        tracing::debug!("creating bootnode {} at {}", self.name(), self.self_addr());
        let opts = self.create_opts("bootnode", self.command());
        self.backend.create(self.name(), opts).await?;
        Ok(())
    }

    pub async fn remove(&self) -> Result<(), EntityError> {
        self.backend.remove(self.name()).await?;
        Ok(())
    }

    pub async fn reboot(&self) -> Result<(), EntityError> {
        self.backend.reboot(self.name()).await?;
        Ok(())
    }
}
