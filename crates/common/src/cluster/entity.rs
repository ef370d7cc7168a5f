use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError};
use crate::network::{self, CommandExecutor, NetworkError, Options};
use crate::rpc::{ControlPlane, ControlPlaneError, PeerInfo};
use crate::utils::poll_immediate_no_error;

use super::{Bootnode, Client, Peer, Rendezvous};

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("failed to encode node config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("node config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} doesn't have any port bindings")]
    NoBindings(String),
    #[error("{0} failed healthcheck")]
    HealthCheck(String),
    #[error("invalid enode reported by node: {0}")]
    InvalidEnode(String),
    #[error("{0} has no control plane connection")]
    NotConnected(String),
    #[error("{0} does not expose a control plane")]
    NoControlPlane(String),
    #[error("{name} has {got} peers, expected at least {want}")]
    PeerCount {
        name: String,
        want: usize,
        got: usize,
    },
    #[error("cancelled")]
    Cancelled,
}

/// Anything the cluster provisions
#[derive(Debug)]
pub enum Entity {
    Bootnode(Bootnode),
    Rendezvous(Rendezvous),
    Peer(Peer),
    Client(Client),
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Entity::Bootnode(node) => node.name(),
            Entity::Rendezvous(node) => node.name(),
            Entity::Peer(peer) => peer.uid(),
            Entity::Client(client) => client.peer().uid(),
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        match self {
            Entity::Bootnode(node) => node.ip(),
            Entity::Rendezvous(node) => node.ip(),
            Entity::Peer(peer) => peer.ip(),
            Entity::Client(client) => client.peer().ip(),
        }
    }

    pub async fn create(&self) -> Result<(), EntityError> {
        match self {
            Entity::Bootnode(node) => node.create().await,
            Entity::Rendezvous(node) => node.create().await,
            Entity::Peer(peer) => peer.create().await,
            Entity::Client(client) => client.peer().create().await,
        }
    }

    pub async fn remove(&self) -> Result<(), EntityError> {
        match self {
            Entity::Bootnode(node) => node.remove().await,
            Entity::Rendezvous(node) => node.remove().await,
            Entity::Peer(peer) => peer.remove().await,
            Entity::Client(client) => client.peer().remove().await,
        }
    }

    pub async fn reboot(&self) -> Result<(), EntityError> {
        match self {
            Entity::Bootnode(node) => node.reboot().await,
            Entity::Rendezvous(node) => node.reboot().await,
            Entity::Peer(peer) => peer.reboot().await,
            Entity::Client(client) => client.peer().reboot().await,
        }
    }

    /// Start shaping this entity's traffic
    pub async fn enable_conditions(&self, opts: &Options) -> Result<(), EntityError> {
        network::start(&self.shell(), opts).await?;
        Ok(())
    }

    /// Stop any shaping, whatever was applied
    pub async fn disable_conditions(&self) -> Result<(), EntityError> {
        network::stop(&self.shell()).await?;
        Ok(())
    }

    pub fn control_plane(&self) -> Result<Arc<dyn ControlPlane>, EntityError> {
        self.as_peer()
            .ok_or_else(|| EntityError::NoControlPlane(self.name().to_string()))?
            .control_plane()
    }

    /// Connections the node currently holds
    pub async fn peers(&self) -> Result<Vec<PeerInfo>, EntityError> {
        Ok(self.control_plane()?.peers().await?)
    }

    /// Poll the peer list every `period` until the node holds at least
    ///  `want` connections. Returns the last failure once `timeout` runs out.
    pub async fn wait_for_peers(
        &self,
        token: &CancellationToken,
        want: usize,
        period: Duration,
        timeout: Duration,
    ) -> Result<(), EntityError> {
        poll_immediate_no_error(
            token,
            |_| async move {
                let got = self.peers().await?.len();
                if got < want {
                    return Err(EntityError::PeerCount {
                        name: self.name().to_string(),
                        want,
                        got,
                    });
                }
                Ok(())
            },
            period,
            timeout,
        )
        .await
    }

    pub async fn request_all_history(&self) -> Result<(), EntityError> {
        self.control_plane()?.request_all_history().await?;
        Ok(())
    }

    pub async fn raw_metrics(&self) -> Result<Vec<u8>, EntityError> {
        match self.as_peer() {
            Some(peer) => peer.raw_metrics().await,
            None => Err(EntityError::NoControlPlane(self.name().to_string())),
        }
    }

    pub fn as_bootnode(&self) -> Option<&Bootnode> {
        match self {
            Entity::Bootnode(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_rendezvous(&self) -> Option<&Rendezvous> {
        match self {
            Entity::Rendezvous(node) => Some(node),
            _ => None,
        }
    }

    /// The node behind relays, mailservers and clients alike
    pub fn as_peer(&self) -> Option<&Peer> {
        match self {
            Entity::Peer(peer) => Some(peer),
            Entity::Client(client) => Some(client.peer()),
            _ => None,
        }
    }

    pub fn as_client(&self) -> Option<&Client> {
        match self {
            Entity::Client(client) => Some(client),
            _ => None,
        }
    }

    fn backend(&self) -> &dyn Backend {
        match self {
            Entity::Bootnode(node) => node.backend(),
            Entity::Rendezvous(node) => node.backend(),
            Entity::Peer(peer) => peer.backend(),
            Entity::Client(client) => client.peer().backend(),
        }
    }

    fn shell(&self) -> ContainerShell<'_> {
        ContainerShell {
            name: self.name(),
            backend: self.backend(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Bootnode(node) => write!(f, "bootnode {} {}", node.name(), node.ip()),
            Entity::Rendezvous(node) => write!(f, "rendezvous {} {}", node.name(), node.addr()),
            Entity::Peer(peer) => write!(f, "peer {} {}", peer.uid(), peer.ip()),
            Entity::Client(client) => {
                write!(f, "client {} {}", client.peer().uid(), client.peer().ip())
            }
        }
    }
}

/// Runs shaping commands inside one entity's container
struct ContainerShell<'a> {
    name: &'a str,
    backend: &'a dyn Backend,
}

#[async_trait::async_trait]
impl<'a> CommandExecutor for ContainerShell<'a> {
    async fn execute(&self, cmd: Vec<String>) -> Result<(), BackendError> {
        tracing::debug!("run command on {}: {}", self.name, cmd.join(" "));
        self.backend.execute(self.name, &cmd).await
    }
}
