//! Integration tests for cluster provisioning and teardown

mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use ::common::cluster::{
    Cluster, ClusterConfig, ClusterError, EntityError, MetricsOpts, PeerType, ScaleOpts,
};
use ::common::ipam::{Ipam, IpamError};
use ::common::metrics::RawMetrics;
use ::common::network::Options;
use ::common::rpc::{PeerInfo, PeerNetwork};
use ::common::testkit::{MemoryBackend, MemoryConnector};
use tokio_util::sync::CancellationToken;

fn peer_at(ip: &str) -> PeerInfo {
    PeerInfo {
        id: format!("id-{}", ip),
        network: PeerNetwork {
            remote_address: format!("{}:30303", ip),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn boot_addrs(cluster: &Cluster) -> Vec<String> {
    cluster
        .running(PeerType::Boot)
        .iter()
        .map(|e| e.as_bootnode().unwrap().self_addr())
        .collect()
}

#[tokio::test]
async fn test_relays_bootstrap_from_every_bootnode() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 2,
            relay: 3,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(env.cluster.running(PeerType::Boot).len(), 2);
    assert_eq!(env.cluster.relays().len(), 3);

    let addrs = boot_addrs(&env.cluster);
    for relay in env.cluster.relays() {
        let config = relay.as_peer().unwrap().config();
        assert_eq!(config.boot_nodes.len(), 2);
        assert_eq!(config.boot_nodes, addrs);
    }

    // the second bootnode knows about the first one
    let second = env.cluster.bootnode(1).unwrap();
    let cmd = second.as_bootnode().unwrap().command();
    assert_eq!(cmd.last().unwrap(), &format!("-n={}", addrs[0]));
}

#[tokio::test]
async fn test_names_and_addresses_are_sequential() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 2,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let boot = env.cluster.bootnode(0).unwrap();
    assert_eq!(boot.name(), "tests_boot_0");
    assert_eq!(boot.ip(), Ipv4Addr::new(10, 0, 170, 2));
    let relay = env.cluster.relay(1).unwrap();
    assert_eq!(relay.name(), "tests_relay_1");
    assert_eq!(relay.ip(), Ipv4Addr::new(10, 0, 170, 4));
    assert_eq!(
        env.cluster.ips(PeerType::Relay),
        vec![Ipv4Addr::new(10, 0, 170, 3), Ipv4Addr::new(10, 0, 170, 4)]
    );
    assert!(env.cluster.relay(2).is_none());
    assert!(env.cluster.user(0).is_none());
}

#[tokio::test]
async fn test_pending_until_deployed() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 2,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(env.cluster.relay(0).is_none());
    assert_eq!(env.cluster.pending(PeerType::Relay).len(), 2);
    assert!(env.cluster.pending_relay(1).is_some());
    assert!(env.backend.created_names().is_empty());

    env.cluster.deploy_pending().await.unwrap();

    assert!(env.cluster.pending_relay(0).is_none());
    assert!(env.cluster.pending(PeerType::Boot).is_empty());
    assert_eq!(env.cluster.relays().len(), 2);
    assert_eq!(env.backend.created_names().len(), 3);
    // deployed peers learnt their address from the node
    let enode = env.cluster.relay(0).unwrap().as_peer().unwrap().enode().unwrap();
    assert!(enode.ends_with("@10.0.170.3:30303"), "{}", enode);
}

#[tokio::test]
async fn test_scaling_up_continues_indices_and_reuses_network() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 2,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();
    env.cluster
        .create(ScaleOpts {
            relay: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(env.backend.networks_created(), 1);
    let relays = env.cluster.relays();
    assert_eq!(relays.len(), 3);
    assert_eq!(relays[2].name(), "tests_relay_2");
    // running bootnodes are picked up by later relays
    let config = relays[2].as_peer().unwrap().config();
    assert_eq!(config.boot_nodes, boot_addrs(&env.cluster));
}

#[tokio::test]
async fn test_explicit_enodes_skip_discovery() {
    let env = common::setup_cluster();
    let external = vec!["enode://abcd@192.168.0.10:30404".to_string()];
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 1,
            deploy: true,
            enodes: Some(external.clone()),
            ..Default::default()
        })
        .await
        .unwrap();

    let relay = env.cluster.relay(0).unwrap();
    assert_eq!(relay.as_peer().unwrap().config().boot_nodes, external);
    let boot = env.cluster.bootnode(0).unwrap();
    assert_eq!(
        boot.as_bootnode().unwrap().command().last().unwrap(),
        "-n=enode://abcd@192.168.0.10:30404"
    );
}

#[tokio::test]
async fn test_rendezvous_nodes_are_tracked_separately() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            rendezvous: 2,
            relay: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(env.cluster.running(PeerType::Boot).is_empty());
    assert_eq!(env.cluster.running(PeerType::RendezvousBoot).len(), 2);

    let addrs: Vec<String> = env
        .cluster
        .running(PeerType::RendezvousBoot)
        .iter()
        .map(|e| e.as_rendezvous().unwrap().addr())
        .collect();
    let relay = env.cluster.relay(0).unwrap();
    let config = relay.as_peer().unwrap().config();
    assert_eq!(config.rendezvous_nodes, addrs);
    assert!(config.node_config().rendezvous);

    let created = env.backend.created("tests_rendezvous_1").unwrap();
    assert_eq!(created.entrypoint.as_deref(), Some("rendezvous"));
    assert_eq!(env.cluster.rendezvous(0).unwrap().name(), "tests_rendezvous_0");
}

#[tokio::test]
async fn test_mailservers_propagate_to_users() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            mails: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();
    env.cluster
        .create(ScaleOpts {
            users: 2,
            mvds: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let mail = env.cluster.mailserver(0).unwrap();
    let mail_peer = mail.as_peer().unwrap();
    assert!(mail_peer.config().mailserver);
    let enode = mail_peer.enode().unwrap();

    for user in env.cluster.users() {
        let client = user.as_client().unwrap();
        assert_eq!(client.peer().config().mailservers, vec![enode.clone()]);
        assert!(!client.peer().command().contains(&"-mvds".to_string()));
    }
    let mvds = env.cluster.mvds(0).unwrap();
    assert_eq!(mvds.as_peer().unwrap().config().mailservers, vec![enode]);
    assert!(mvds.as_peer().unwrap().command().contains(&"-mvds".to_string()));
}

#[tokio::test]
async fn test_undeployed_mailservers_are_not_trusted() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            mails: 1,
            users: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    // staged alongside the mailserver, before it had an enode
    let early = env.cluster.user(0).unwrap();
    assert!(early.as_client().unwrap().peer().config().mailservers.is_empty());

    env.cluster
        .create(ScaleOpts {
            users: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let enode = env
        .cluster
        .mailserver(0)
        .unwrap()
        .as_peer()
        .unwrap()
        .enode()
        .unwrap();
    let late = env.cluster.user(1).unwrap();
    assert_eq!(
        late.as_client().unwrap().peer().config().mailservers,
        vec![enode]
    );
}

#[tokio::test]
async fn test_failed_create_is_still_cleaned() {
    let env = common::setup_cluster();
    env.backend.fail_create("tests_relay_1");

    let err = env
        .cluster
        .create(ScaleOpts {
            relay: 3,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap_err();

    match err {
        ClusterError::Group(group) => {
            let failures: Vec<_> = group.failures().collect();
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("tests_relay_1"), "{}", failures[0]);
        }
        other => panic!("unexpected error: {}", other),
    }
    // broken or not, every entity is running so teardown can reach it
    assert_eq!(env.cluster.relays().len(), 3);
    assert!(env.cluster.pending(PeerType::Relay).is_empty());

    env.cluster.clean().await;

    let mut removed = env.backend.removed();
    removed.sort();
    assert_eq!(removed, vec!["tests_relay_0", "tests_relay_1", "tests_relay_2"]);
    assert_eq!(env.backend.removed_networks().len(), 1);
    assert!(env.backend.networks().is_empty());
    assert!(env.cluster.relays().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_deploys_create_each_entity_once() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 2,
            ..Default::default()
        })
        .await
        .unwrap();

    let (first, second) = tokio::join!(env.cluster.deploy_pending(), env.cluster.deploy_pending());
    first.unwrap();
    second.unwrap();

    assert_eq!(env.cluster.relays().len(), 2);
    assert_eq!(env.cluster.running(PeerType::Boot).len(), 1);
    for name in ["tests_boot_0", "tests_relay_0", "tests_relay_1"] {
        assert_eq!(env.backend.create_calls(name), 1, "{}", name);
    }

    // a later create keeps counting from what was deployed
    env.cluster
        .create(ScaleOpts {
            relay: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(env.cluster.relays().len(), 3);
    assert_eq!(env.cluster.relay(2).unwrap().name(), "tests_relay_2");
}

#[tokio::test]
async fn test_panicking_create_is_still_cleaned() {
    let env = common::setup_cluster();
    env.backend.panic_create("tests_relay_0");

    let err = env
        .cluster
        .create(ScaleOpts {
            relay: 2,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("task did not complete"), "{}", err);
    assert_eq!(env.cluster.relays().len(), 2);
    assert!(env.cluster.pending(PeerType::Relay).is_empty());

    env.cluster.clean().await;
    assert!(!env.backend.exists("tests_relay_0"));
    assert!(!env.backend.exists("tests_relay_1"));
}

#[tokio::test]
async fn test_keep_skips_clean() {
    let env = common::setup_cluster_with(ClusterConfig {
        keep: true,
        ..Default::default()
    });
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 2,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    env.cluster.clean().await;

    assert!(env.backend.removed().is_empty());
    assert!(env.backend.removed_networks().is_empty());
    assert_eq!(env.cluster.relays().len(), 2);
}

#[tokio::test]
async fn test_reboot_by_type() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 2,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    env.cluster.reboot(PeerType::Relay).await.unwrap();
    let mut rebooted = env.backend.rebooted();
    rebooted.sort();
    assert_eq!(rebooted, vec!["tests_relay_0", "tests_relay_1"]);
    // control plane reconnected after reboot
    assert_eq!(env.connector.connections(), 4);

    let err = env.cluster.reboot(PeerType::User).await.unwrap_err();
    assert!(matches!(err, ClusterError::NoneRunning(PeerType::User)));
    assert_eq!(err.to_string(), "type user not found in running");
}

#[tokio::test]
async fn test_conditions_apply_to_every_running_entity() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 2,
            users: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    env.cluster
        .enable_conditions_globally(&Options {
            latency: 200,
            packet_loss: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    env.cluster.disable_conditions_globally().await.unwrap();

    for name in ["tests_boot_0", "tests_relay_0", "tests_relay_1", "tests_user_0"] {
        assert_eq!(
            env.backend.executed(name),
            vec![
                vec!["comcast", "-latency", "200", "-packet-loss", "10"],
                vec!["comcast", "-stop"],
            ],
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_empty_conditions_are_rejected_up_front() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            relay: 2,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let err = env
        .cluster
        .enable_conditions_globally(&Options::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterError::Conditions(_)));
    assert!(env.backend.executed("tests_relay_0").is_empty());
}

#[tokio::test]
async fn test_fill_metrics() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 2,
            users: 2,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();
    env.connector
        .plane("tests_relay_0")
        .set_metrics(serde_json::json!({"whisper": {"envelopes": {"new": 12}}}));
    env.connector
        .plane("tests_relay_1")
        .set_metrics(serde_json::json!({"whisper": {"envelopes": {"new": 30}}}));

    let metrics = Arc::new(RawMetrics::new());
    env.cluster
        .fill_metrics(
            metrics.clone(),
            MetricsOpts {
                no_users: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(metrics.uids(), vec!["tests_relay_0", "tests_relay_1"]);
    assert_eq!(metrics.sum("/whisper/envelopes/new"), 42);

    env.cluster
        .fill_metrics(metrics.clone(), MetricsOpts::default())
        .await
        .unwrap();
    assert_eq!(metrics.len(), 4);
}

#[tokio::test]
async fn test_exhausted_address_space_adds_nothing() {
    common::init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    // .2 to .6 are usable
    let cluster = Cluster::new(
        ClusterConfig::default(),
        Arc::new(Ipam::new("10.0.170.0/29").unwrap()),
        backend.clone(),
        Arc::new(MemoryConnector::new()),
    );

    let err = cluster
        .create(ScaleOpts {
            boot: 1,
            relay: 5,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClusterError::Ipam(IpamError::AddressSpaceExhausted(_))
    ));
    assert!(cluster.pending(PeerType::Boot).is_empty());
    assert!(cluster.pending(PeerType::Relay).is_empty());
    assert!(backend.created_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_node_fails_deploy_instead_of_hanging() {
    let env = common::setup_cluster();
    env.connector.plane("tests_relay_1").set_stalled(true);

    let started = tokio::time::Instant::now();
    let err = env
        .cluster
        .create(ScaleOpts {
            relay: 2,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("tests_relay_1 failed healthcheck"), "{}", err);
    // every attempt is bounded, so the whole healthcheck is too
    assert!(started.elapsed() < Duration::from_secs(200));
    assert!(env.cluster.relay(0).unwrap().as_peer().unwrap().enode().is_some());
    assert_eq!(env.cluster.relays().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_node_fails_deploy() {
    let env = common::setup_cluster();
    env.connector.plane("tests_user_0").set_unhealthy(true);

    let err = env
        .cluster
        .create(ScaleOpts {
            relay: 1,
            users: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("tests_user_0 failed healthcheck"), "{}", err);
    assert_eq!(env.cluster.users().len(), 1);
    assert!(env.cluster.user(0).unwrap().as_peer().unwrap().enode().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_peers() {
    let env = common::setup_cluster();
    env.cluster
        .create(ScaleOpts {
            relay: 3,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let relay = env.cluster.relay(0).unwrap();
    let plane = env.connector.plane("tests_relay_0");
    plane.set_peers(vec![peer_at("10.0.170.3")]);
    let token = CancellationToken::new();

    relay
        .wait_for_peers(&token, 1, Duration::from_millis(200), Duration::from_secs(2))
        .await
        .unwrap();
    let peers = relay.peers().await.unwrap();
    assert_eq!(peers[0].remote_ip(), "10.0.170.3");

    let err = relay
        .wait_for_peers(&token, 2, Duration::from_millis(200), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(
        matches!(err, EntityError::PeerCount { want: 2, got: 1, .. }),
        "{}",
        err
    );

    // the second connection shows up while polling
    let late = plane.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        late.set_peers(vec![peer_at("10.0.170.3"), peer_at("10.0.170.4")]);
    });
    relay
        .wait_for_peers(&token, 2, Duration::from_millis(200), Duration::from_secs(10))
        .await
        .unwrap();

    // bootnodes have no control plane to ask
    env.cluster
        .create(ScaleOpts {
            boot: 1,
            deploy: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let err = env
        .cluster
        .bootnode(0)
        .unwrap()
        .wait_for_peers(&token, 1, Duration::from_millis(200), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::NoControlPlane(_)), "{}", err);
}
