use std::sync::Arc;

use crate::backend::Backend;
use crate::crypto::SecretKey;
use crate::rpc::ControlPlaneConnector;

use super::peer::CONTAINER_CONFIG;
use super::{Peer, PeerConfig};

/// A user node: a terminal chat client started with its own identity
#[derive(Debug)]
pub struct Client {
    peer: Peer,
    identity: SecretKey,
}

impl Client {
    pub fn new(
        config: PeerConfig,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn ControlPlaneConnector>,
        identity: SecretKey,
    ) -> Self {
        let cmd = client_command(&identity, false);
        Self {
            peer: Peer::new(config, backend, connector, cmd),
            identity,
        }
    }

    /// Client that syncs messages over MVDS
    pub fn mvds(
        config: PeerConfig,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn ControlPlaneConnector>,
        identity: SecretKey,
    ) -> Self {
        let cmd = client_command(&identity, true);
        Self {
            peer: Peer::new(config, backend, connector, cmd),
            identity,
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn identity(&self) -> &SecretKey {
        &self.identity
    }
}

fn client_command(identity: &SecretKey, mvds: bool) -> Vec<String> {
    let mut cmd = vec!["status-term-client".to_string()];
    if mvds {
        cmd.push("-mvds".to_string());
    }
    cmd.extend(
        [
            "-no-ui",
            "-node-config",
            CONTAINER_CONFIG,
            "-keyhex",
            &identity.to_hex(),
            "-log-level",
            "TRACE",
        ]
        .into_iter()
        .map(String::from),
    );
    cmd
}
