use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::backend::Backend;
use crate::crypto::PublicKey;

use super::{Bootnode, BootnodeConfig, EntityError};

/// Rendezvous server. Shares the bootnode's shape (static IP, key
///  known up front) but runs a different binary and is addressed by
///  multiaddr.
#[derive(Debug)]
pub struct Rendezvous(Bootnode);

impl Rendezvous {
    pub fn new(config: BootnodeConfig, backend: Arc<dyn Backend>) -> Self {
        Self(Bootnode::new(config, backend))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.0.ip()
    }

    pub fn public_key(&self) -> PublicKey {
        self.0.public_key()
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.0.backend()
    }

    /// Multiaddr peers register at
    pub fn addr(&self) -> String {
        format!(
            "/ip4/{}/tcp/{}/ethv4/{}",
            self.0.ip(),
            self.0.port(),
            self.0.public_key().peer_id()
        )
    }

    pub fn command(&self) -> Vec<String> {
        vec![
            format!("-a={}", self.0.ip()),
            format!("-p={}", self.0.port()),
            format!("-keyhex={}", self.0.secret_key().to_hex()),
        ]
    }

    pub async fn create(&self) -> Result<(), EntityError> {
        tracing::debug!("creating rendezvous {} at {}", self.name(), self.addr());
        let opts = self.0.create_opts("rendezvous", self.command());
        self.0.backend().create(self.name(), opts).await?;
        Ok(())
    }

    pub async fn remove(&self) -> Result<(), EntityError> {
        self.0.remove().await
    }

    pub async fn reboot(&self) -> Result<(), EntityError> {
        self.0.reboot().await
    }
}
