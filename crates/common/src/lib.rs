/**
 * Container runtime seam: what the cluster needs
 *  from whatever runs its containers.
 */
pub mod backend;
/**
 * Churn simulation over a fixed set of participants.
 *  Drives each one between online and offline windows
 *  and forces a history resync when it comes back.
 */
pub mod churn;
/**
 * The cluster registry and the entities it provisions:
 *  bootnodes, rendezvous nodes, relays, mailservers
 *  and clients.
 */
pub mod cluster;
/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 */
pub mod crypto;
/**
 * Sequential IPv4 allocation over a CIDR block.
 */
pub mod ipam;
/**
 * Raw metrics collected from running nodes.
 */
pub mod metrics;
/**
 * Synthetic network degradation (latency, loss,
 *  bandwidth) applied inside a container.
 */
pub mod network;
/**
 * Node control plane: trait plus a JSON-RPC
 *  over HTTP implementation.
 */
pub mod rpc;
/**
 * In-memory backend and control plane for tests.
 */
pub mod testkit;
/**
 * Fan-out groups and polling helpers.
 */
pub mod utils;

pub mod prelude {
    pub use crate::backend::{Backend, BackendError};
    pub use crate::churn::{ChurnError, ChurnSim, Params as ChurnParams};
    pub use crate::cluster::{
        Cluster, ClusterConfig, ClusterError, Entity, EntityError, MetricsOpts, PeerType,
        ScaleOpts,
    };
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::ipam::{Ipam, IpamError};
    pub use crate::metrics::{MetricsSink, RawMetrics};
    pub use crate::network::Options as NetworkOptions;
    pub use crate::rpc::{ControlPlane, ControlPlaneConnector, JsonRpcConnector};
    pub use crate::utils::{eventually, Group, GroupError};
}
