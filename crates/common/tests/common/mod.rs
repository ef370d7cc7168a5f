//! Shared test utilities for cluster integration tests
#![allow(dead_code)]

use std::sync::Arc;

use common::cluster::{Cluster, ClusterConfig};
use common::ipam::Ipam;
use common::testkit::{MemoryBackend, MemoryConnector};

pub const CIDR: &str = "10.0.170.0/24";

/// A cluster on the in-memory backend, plus handles to inspect it
pub struct TestCluster {
    pub cluster: Cluster,
    pub backend: Arc<MemoryBackend>,
    pub connector: Arc<MemoryConnector>,
}

pub fn setup_cluster() -> TestCluster {
    setup_cluster_with(ClusterConfig::default())
}

pub fn setup_cluster_with(config: ClusterConfig) -> TestCluster {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let connector = Arc::new(MemoryConnector::new());
    let cluster = Cluster::new(
        config,
        Arc::new(Ipam::new(CIDR).unwrap()),
        backend.clone(),
        connector.clone(),
    );
    TestCluster {
        cluster,
        backend,
        connector,
    }
}

/// Log to the test writer, filtered by RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
