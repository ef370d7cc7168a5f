/// In-process fakes for exercising a cluster without a container runtime
///
/// [`MemoryBackend`] records every container operation and can be told to
/// fail some of them. [`MemoryConnector`] hands out one
/// [`MemoryControlPlane`] per container, so tests can script node behaviour
/// (health, resync failures, metrics) and inspect the calls made.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use common::prelude::*;
/// use common::testkit::{MemoryBackend, MemoryConnector};
///
/// #[tokio::test]
/// async fn test_relays() -> anyhow::Result<()> {
///     let backend = Arc::new(MemoryBackend::new());
///     let connector = Arc::new(MemoryConnector::new());
///     let cluster = Cluster::new(
///         ClusterConfig::default(),
///         Arc::new(Ipam::new("10.0.170.0/24")?),
///         backend.clone(),
///         connector.clone(),
///     );
///
///     cluster.create(ScaleOpts { boot: 1, relay: 2, deploy: true, ..Default::default() }).await?;
///     assert_eq!(cluster.relays().len(), 2);
///
///     cluster.clean().await;
///     assert_eq!(backend.removed().len(), 3);
///     Ok(())
/// }
/// ```
mod backend;
mod control_plane;

pub use backend::MemoryBackend;
pub use control_plane::{MemoryConnector, MemoryControlPlane};
