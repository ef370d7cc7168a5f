//! Cluster registry.
//!
//! Tracks every entity of a test topology from the moment it is
//!  requested (pending) until it is torn down. Entities are built in
//!  dependency order: bootstrap addresses are resolved before the
//!  configs that embed them. Deployment itself is concurrent and
//!  unordered; dependents rely on their own healthcheck retries.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError, NetOpts};
use crate::crypto::SecretKey;
use crate::ipam::{Ipam, IpamError};
use crate::metrics::MetricsSink;
use crate::network::{NetworkError, Options};
use crate::rpc::ControlPlaneConnector;
use crate::utils::{Group, GroupError};

mod bootnode;
mod client;
mod entity;
mod node_config;
mod peer;
mod rendezvous;

pub use bootnode::{Bootnode, BootnodeConfig, BOOTNODE_PORT};
pub use client::Client;
pub use entity::{Entity, EntityError};
pub use node_config::{NodeConfig, PeerConfig, TopicLimits, DEFAULT_MAILSERVER_PASSWORD};
pub use peer::{Peer, CONTAINER_CONFIG, LISTEN_PORT};
pub use rendezvous::Rendezvous;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error(transparent)]
    Ipam(#[from] IpamError),
    #[error("failed to ensure network: {0}")]
    Network(#[from] BackendError),
    #[error("invalid conditions: {0}")]
    Conditions(#[from] NetworkError),
    #[error("{0}")]
    Group(#[from] GroupError),
    #[error("type {0} not found in running")]
    NoneRunning(PeerType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerType {
    Boot,
    Relay,
    User,
    Mail,
    Mvds,
    RendezvousBoot,
}

impl PeerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerType::Boot => "boot",
            PeerType::Relay => "relay",
            PeerType::User => "user",
            PeerType::Mail => "mail",
            PeerType::Mvds => "mvds",
            PeerType::RendezvousBoot => "rendezvous",
        }
    }
}

impl fmt::Display for PeerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by every entity of one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// prepended to every container and network name
    pub prefix: String,
    pub node_image: String,
    pub bootnode_image: String,
    pub rendezvous_image: String,
    /// leave containers and network in place on clean
    pub keep: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            prefix: "tests".to_string(),
            node_image: "statusteam/statusd:latest".to_string(),
            bootnode_image: "statusteam/bootnode:latest".to_string(),
            rendezvous_image: "statusteam/rendezvous:latest".to_string(),
            keep: false,
        }
    }
}

/// How many entities of each type to add
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaleOpts {
    pub boot: usize,
    pub relay: usize,
    pub users: usize,
    pub mails: usize,
    pub mvds: usize,
    pub rendezvous: usize,
    pub deploy: bool,
    /// bootnode addresses to use instead of the cluster's own
    pub enodes: Option<Vec<String>>,
    /// rendezvous addresses to use instead of the cluster's own
    pub rendezvous_nodes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsOpts {
    pub no_relay: bool,
    pub no_users: bool,
}

#[derive(Debug, Clone)]
struct Member {
    index: usize,
    entity: Arc<Entity>,
}

#[derive(Debug, Default)]
struct Registry {
    net_id: Option<String>,
    pending: BTreeMap<PeerType, Vec<Member>>,
    /// taken from pending by a deployment, not yet created
    deploying: BTreeMap<PeerType, Vec<Member>>,
    running: BTreeMap<PeerType, Vec<Member>>,
}

impl Registry {
    fn total_of(&self, typ: PeerType) -> usize {
        [&self.pending, &self.deploying, &self.running]
            .iter()
            .map(|set| set.get(&typ).map_or(0, Vec::len))
            .sum()
    }

    /// Running members of `typ`, then deploying, then pending ones
    fn members(&self, typ: PeerType) -> impl Iterator<Item = &Member> {
        self.running
            .get(&typ)
            .into_iter()
            .chain(self.deploying.get(&typ))
            .chain(self.pending.get(&typ))
            .flatten()
    }

    fn running(&self, typ: PeerType) -> Vec<Arc<Entity>> {
        self.running
            .get(&typ)
            .map(|members| members.iter().map(|m| m.entity.clone()).collect())
            .unwrap_or_default()
    }

    fn pending(&self, typ: PeerType) -> Vec<Arc<Entity>> {
        self.pending
            .get(&typ)
            .map(|members| members.iter().map(|m| m.entity.clone()).collect())
            .unwrap_or_default()
    }

    /// Empty pending into deploying and return what was taken
    fn take_pending(&mut self) -> Vec<(PeerType, Member)> {
        let taken = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        for (typ, members) in taken {
            out.extend(members.iter().map(|m| (typ, m.clone())));
            self.deploying.entry(typ).or_default().extend(members);
        }
        out
    }

    /// Move a member out of deploying into running, keeping running
    ///  ordered by index. Members no longer deploying (the registry was
    ///  cleaned meanwhile) are dropped.
    fn promote(&mut self, typ: PeerType, member: Member) {
        let Some(deploying) = self.deploying.get_mut(&typ) else {
            return;
        };
        let Some(at) = deploying
            .iter()
            .position(|m| Arc::ptr_eq(&m.entity, &member.entity))
        else {
            return;
        };
        deploying.remove(at);
        if deploying.is_empty() {
            self.deploying.remove(&typ);
        }
        let running = self.running.entry(typ).or_default();
        let at = running.partition_point(|m| m.index < member.index);
        running.insert(at, member);
    }
}

/// Promotes its member when dropped, so a deployment task that panics
///  or is aborted still leaves the entity reachable by `clean`
struct Promotion {
    registry: Arc<Mutex<Registry>>,
    typ: PeerType,
    member: Option<Member>,
}

impl Drop for Promotion {
    fn drop(&mut self) {
        if let Some(member) = self.member.take() {
            self.registry.lock().promote(self.typ, member);
        }
    }
}

/// Entities staged by one `create` call, not yet visible in the registry
#[derive(Default)]
struct Staged(Vec<(PeerType, Member)>);

impl Staged {
    fn push(&mut self, typ: PeerType, index: usize, entity: Entity) {
        self.0.push((
            typ,
            Member {
                index,
                entity: Arc::new(entity),
            },
        ));
    }
}

/// Bootstrap lists shared by every node staged in one `create` call
struct Bootstrap<'a> {
    net_id: &'a str,
    enodes: &'a [String],
    rendezvous_nodes: &'a [String],
    mailservers: &'a [String],
}

#[derive(Debug)]
pub struct Cluster {
    config: ClusterConfig,
    ipam: Arc<Ipam>,
    backend: Arc<dyn Backend>,
    connector: Arc<dyn ControlPlaneConnector>,
    token: CancellationToken,
    registry: Arc<Mutex<Registry>>,
}

impl Cluster {
    pub fn new(
        config: ClusterConfig,
        ipam: Arc<Ipam>,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn ControlPlaneConnector>,
    ) -> Self {
        Self {
            config,
            ipam,
            backend,
            connector,
            token: CancellationToken::new(),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn ipam(&self) -> &Ipam {
        &self.ipam
    }

    pub fn network_id(&self) -> Option<String> {
        self.registry.lock().net_id.clone()
    }

    /// Cancels deployments and fan-outs in flight
    pub fn cancel(&self) {
        self.token.cancel();
    }

    fn name(&self, parts: &[&str]) -> String {
        std::iter::once(self.config.prefix.as_str())
            .chain(parts.iter().copied())
            .collect::<Vec<_>>()
            .join("_")
    }

    fn entity_name(&self, typ: PeerType, index: usize) -> String {
        self.name(&[typ.as_str(), &index.to_string()])
    }

    /// Add the entities requested by `opts`, deploying them right away
    ///  when `opts.deploy` is set.
    pub async fn create(&self, opts: ScaleOpts) -> Result<(), ClusterError> {
        tracing::debug!(
            "adding nodes to cluster {} ({}): {:?}",
            self.config.prefix,
            self.ipam,
            opts
        );
        let known = self.network_id();
        let net_id = self
            .backend
            .ensure_network(NetOpts {
                name: self.name(&["net"]),
                cidr: self.ipam.cidr().to_string(),
                net_id: known,
            })
            .await?;

        {
            let mut registry = self.registry.lock();
            registry.net_id = Some(net_id.clone());
            let staged = self.stage(&registry, &net_id, &opts)?;
            for (typ, member) in staged.0 {
                tracing::trace!("adding {} to pending", member.entity);
                registry.pending.entry(typ).or_default().push(member);
            }
        }

        if opts.deploy {
            self.deploy_pending().await?;
        }
        Ok(())
    }

    /// Build every requested entity; nothing is added to the registry
    ///  unless all of them could be built.
    fn stage(
        &self,
        registry: &Registry,
        net_id: &str,
        opts: &ScaleOpts,
    ) -> Result<Staged, ClusterError> {
        let mut staged = Staged::default();

        let mut enodes = match &opts.enodes {
            Some(enodes) => enodes.clone(),
            None => registry
                .members(PeerType::Boot)
                .filter_map(|m| m.entity.as_bootnode().map(Bootnode::self_addr))
                .collect(),
        };
        let boot = registry.total_of(PeerType::Boot);
        for index in boot..boot + opts.boot {
            let node = Bootnode::new(
                BootnodeConfig {
                    name: self.entity_name(PeerType::Boot, index),
                    ip: self.ipam.take()?,
                    net_id: net_id.to_string(),
                    image: self.config.bootnode_image.clone(),
                    enodes: enodes.clone(),
                },
                self.backend.clone(),
            );
            if opts.enodes.is_none() {
                enodes.push(node.self_addr());
            }
            staged.push(PeerType::Boot, index, Entity::Bootnode(node));
        }

        let mut rendezvous_nodes = match &opts.rendezvous_nodes {
            Some(nodes) => nodes.clone(),
            None => registry
                .members(PeerType::RendezvousBoot)
                .filter_map(|m| m.entity.as_rendezvous().map(Rendezvous::addr))
                .collect(),
        };
        let rendezvous = registry.total_of(PeerType::RendezvousBoot);
        for index in rendezvous..rendezvous + opts.rendezvous {
            let node = Rendezvous::new(
                BootnodeConfig {
                    name: self.entity_name(PeerType::RendezvousBoot, index),
                    ip: self.ipam.take()?,
                    net_id: net_id.to_string(),
                    image: self.config.rendezvous_image.clone(),
                    enodes: Vec::new(),
                },
                self.backend.clone(),
            );
            if opts.rendezvous_nodes.is_none() {
                rendezvous_nodes.push(node.addr());
            }
            staged.push(PeerType::RendezvousBoot, index, Entity::Rendezvous(node));
        }

        // only deployed mailservers know their address
        let mailservers: Vec<String> = registry
            .members(PeerType::Mail)
            .filter_map(|m| m.entity.as_peer()?.enode())
            .collect();

        let bootstrap = Bootstrap {
            net_id,
            enodes: &enodes,
            rendezvous_nodes: &rendezvous_nodes,
            mailservers: &mailservers,
        };

        let relay = registry.total_of(PeerType::Relay);
        for index in relay..relay + opts.relay {
            let config = self.relay_config(PeerType::Relay, index, &bootstrap)?;
            let peer = Peer::statusd(config, self.backend.clone(), self.connector.clone());
            staged.push(PeerType::Relay, index, Entity::Peer(peer));
        }

        let mails = registry.total_of(PeerType::Mail);
        for index in mails..mails + opts.mails {
            let config = PeerConfig {
                mailserver: true,
                ..self.relay_config(PeerType::Mail, index, &bootstrap)?
            };
            let peer = Peer::statusd(config, self.backend.clone(), self.connector.clone());
            staged.push(PeerType::Mail, index, Entity::Peer(peer));
        }

        let users = registry.total_of(PeerType::User);
        for index in users..users + opts.users {
            let config = self.user_config(PeerType::User, index, &bootstrap)?;
            let client = Client::new(
                config,
                self.backend.clone(),
                self.connector.clone(),
                SecretKey::generate(),
            );
            staged.push(PeerType::User, index, Entity::Client(client));
        }

        let mvds = registry.total_of(PeerType::Mvds);
        for index in mvds..mvds + opts.mvds {
            let config = self.user_config(PeerType::Mvds, index, &bootstrap)?;
            let client = Client::mvds(
                config,
                self.backend.clone(),
                self.connector.clone(),
                SecretKey::generate(),
            );
            staged.push(PeerType::Mvds, index, Entity::Client(client));
        }

        Ok(staged)
    }

    fn base_config(
        &self,
        typ: PeerType,
        index: usize,
        bootstrap: &Bootstrap<'_>,
    ) -> Result<PeerConfig, ClusterError> {
        Ok(PeerConfig {
            name: self.entity_name(typ, index),
            net_id: bootstrap.net_id.to_string(),
            ip: self.ipam.take()?,
            image: self.config.node_image.clone(),
            boot_nodes: bootstrap.enodes.to_vec(),
            rendezvous_nodes: bootstrap.rendezvous_nodes.to_vec(),
            ..Default::default()
        })
    }

    fn relay_config(
        &self,
        typ: PeerType,
        index: usize,
        bootstrap: &Bootstrap<'_>,
    ) -> Result<PeerConfig, ClusterError> {
        Ok(PeerConfig {
            topic_search: BTreeMap::from([("whisper".to_string(), TopicLimits::new(5, 7))]),
            topic_register: vec!["whisper".to_string()],
            ..self.base_config(typ, index, bootstrap)?
        })
    }

    fn user_config(
        &self,
        typ: PeerType,
        index: usize,
        bootstrap: &Bootstrap<'_>,
    ) -> Result<PeerConfig, ClusterError> {
        Ok(PeerConfig {
            topic_search: BTreeMap::from([("whisper".to_string(), TopicLimits::new(2, 2))]),
            mailservers: bootstrap.mailservers.to_vec(),
            ..self.base_config(typ, index, bootstrap)?
        })
    }

    /// Create every pending entity concurrently.
    ///
    /// Each entity moves to running once its create returns, failed or
    ///  not, so `clean` can still reach it.
    pub async fn deploy_pending(&self) -> Result<(), ClusterError> {
        let pending = self.registry.lock().take_pending();
        tracing::debug!("deploying {} pending entities", pending.len());

        let mut group = Group::new(&self.token);
        for (typ, member) in pending {
            let entity = member.entity.clone();
            let promotion = Promotion {
                registry: self.registry.clone(),
                typ,
                member: Some(member),
            };
            group.run(move |token| async move {
                let result = tokio::select! {
                    result = entity.create() => result,
                    _ = token.cancelled() => Err(EntityError::Cancelled),
                };
                drop(promotion);
                result.map_err(|e| format!("error creating {}: {}", entity, e))
            });
        }
        let result = group.error().await;
        tracing::debug!("finished cluster deployment: {:?}", result);
        Ok(result?)
    }

    pub fn running(&self, typ: PeerType) -> Vec<Arc<Entity>> {
        self.registry.lock().running(typ)
    }

    pub fn pending(&self, typ: PeerType) -> Vec<Arc<Entity>> {
        self.registry.lock().pending(typ)
    }

    /// `n`th running entity of `typ`
    pub fn get(&self, typ: PeerType, n: usize) -> Option<Arc<Entity>> {
        self.registry
            .lock()
            .running
            .get(&typ)?
            .get(n)
            .map(|m| m.entity.clone())
    }

    pub fn pending_relay(&self, n: usize) -> Option<Arc<Entity>> {
        self.registry
            .lock()
            .pending
            .get(&PeerType::Relay)?
            .get(n)
            .map(|m| m.entity.clone())
    }

    pub fn bootnode(&self, n: usize) -> Option<Arc<Entity>> {
        self.get(PeerType::Boot, n)
    }

    pub fn rendezvous(&self, n: usize) -> Option<Arc<Entity>> {
        self.get(PeerType::RendezvousBoot, n)
    }

    pub fn relay(&self, n: usize) -> Option<Arc<Entity>> {
        self.get(PeerType::Relay, n)
    }

    pub fn mailserver(&self, n: usize) -> Option<Arc<Entity>> {
        self.get(PeerType::Mail, n)
    }

    pub fn user(&self, n: usize) -> Option<Arc<Entity>> {
        self.get(PeerType::User, n)
    }

    pub fn mvds(&self, n: usize) -> Option<Arc<Entity>> {
        self.get(PeerType::Mvds, n)
    }

    pub fn relays(&self) -> Vec<Arc<Entity>> {
        self.running(PeerType::Relay)
    }

    pub fn users(&self) -> Vec<Arc<Entity>> {
        self.running(PeerType::User)
    }

    fn all_running(&self) -> Vec<Arc<Entity>> {
        self.registry
            .lock()
            .running
            .values()
            .flatten()
            .map(|m| m.entity.clone())
            .collect()
    }

    /// Reboot every running entity of `typ`
    pub async fn reboot(&self, typ: PeerType) -> Result<(), ClusterError> {
        let entities = self.running(typ);
        if entities.is_empty() {
            return Err(ClusterError::NoneRunning(typ));
        }
        let mut group = Group::new(&self.token);
        for entity in entities {
            group.run(move |_| async move {
                entity
                    .reboot()
                    .await
                    .map_err(|e| format!("error rebooting {}: {}", entity, e))
            });
        }
        Ok(group.error().await?)
    }

    /// Remove every running entity and the network, unless the cluster
    ///  is kept. Failures are logged.
    pub async fn clean(&self) {
        if self.config.keep {
            tracing::debug!("keeping cluster {}", self.config.prefix);
            return;
        }
        let (running, deploying, pending, net_id) = {
            let mut registry = self.registry.lock();
            (
                std::mem::take(&mut registry.running),
                std::mem::take(&mut registry.deploying),
                std::mem::take(&mut registry.pending),
                registry.net_id.take(),
            )
        };
        if !pending.is_empty() {
            tracing::debug!(
                "dropping {} entities that were never deployed",
                pending.values().map(Vec::len).sum::<usize>()
            );
        }
        // a deployment still in flight may already have a container
        for member in running.into_values().chain(deploying.into_values()).flatten() {
            if let Err(e) = member.entity.remove().await {
                tracing::error!("error removing {}: {}", member.entity, e);
            }
        }
        if let Some(net_id) = net_id {
            let name = self.name(&["net"]);
            tracing::debug!("removing network {} ({})", name, net_id);
            if let Err(e) = self.backend.remove_network(&net_id).await {
                tracing::error!("error removing network {}: {}", name, e);
            }
        }
    }

    /// Apply `opts` to every running entity
    pub async fn enable_conditions_globally(&self, opts: &Options) -> Result<(), ClusterError> {
        opts.start_command()?;
        let mut group = Group::new(&self.token);
        for entity in self.all_running() {
            let opts = opts.clone();
            group.run(move |_| async move {
                entity
                    .enable_conditions(&opts)
                    .await
                    .map_err(|e| format!("error enabling conditions on {}: {}", entity, e))
            });
        }
        Ok(group.error().await?)
    }

    pub async fn disable_conditions_globally(&self) -> Result<(), ClusterError> {
        let mut group = Group::new(&self.token);
        for entity in self.all_running() {
            group.run(move |_| async move {
                entity
                    .disable_conditions()
                    .await
                    .map_err(|e| format!("error disabling conditions on {}: {}", entity, e))
            });
        }
        Ok(group.error().await?)
    }

    /// Collect raw metrics from running relays and users into `sink`
    pub async fn fill_metrics(
        &self,
        sink: Arc<dyn MetricsSink>,
        opts: MetricsOpts,
    ) -> Result<(), ClusterError> {
        let mut types = Vec::new();
        if !opts.no_relay {
            types.push(PeerType::Relay);
        }
        if !opts.no_users {
            types.push(PeerType::User);
        }

        let mut group = Group::new(&self.token);
        for entity in types.into_iter().flat_map(|typ| self.running(typ)) {
            let sink = sink.clone();
            group.run(move |_| async move {
                tracing::debug!("fetching metrics for {}", entity.name());
                let data = entity.raw_metrics().await?;
                sink.append(entity.name(), &data)?;
                Ok::<_, anyhow::Error>(())
            });
        }
        Ok(group.error().await?)
    }

    /// Addresses of running entities of `typ`
    pub fn ips(&self, typ: PeerType) -> Vec<Ipv4Addr> {
        self.running(typ).iter().map(|e| e.ip()).collect()
    }
}
