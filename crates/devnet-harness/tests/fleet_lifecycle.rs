//! Process fleet lifecycle against the in-memory supervisor

use std::sync::Arc;
use std::time::Duration;

use devnet_core::{DevnetError, NodeId, NodeLifecycle, ProcessErrorKind};
use devnet_harness::provenance::StagedBinaryStore;
use devnet_harness::{Collaborators, Harness};
use devnet_testkit::{init_test_logging, EventKind, TestNetworkBuilder};

fn node(index: u16) -> NodeId {
    NodeId::new(index)
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(3).build().await;
    let fleet = &net.harness.fleet;

    let first = fleet.process(node(1)).await.unwrap().identity.unwrap();
    let again = fleet.start(node(1)).await.unwrap();
    assert_eq!(first, again, "a running node keeps its process");
    assert_eq!(net.supervisor.live_processes(node(1)), 1);
    let spawns = net
        .supervisor
        .events_for(node(1))
        .iter()
        .filter(|e| matches!(e.kind, EventKind::Spawned(_)))
        .count();
    assert_eq!(spawns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_launch_spec_points_at_versioned_assets() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).build().await;

    let launches = net.supervisor.launches();
    assert_eq!(launches.len(), 2);
    let spec = launches.iter().find(|s| s.node == node(2)).unwrap();
    let descriptor = net.harness.assets.node(node(2)).unwrap();
    assert_eq!(spec.program, descriptor.bin_dir(&descriptor.version).join("node"));
    assert_eq!(spec.args[0], "validator");
    assert_eq!(spec.args[1], descriptor.config_path().display().to_string());
    assert_eq!(spec.env.get("DEVNET_NODE_ID").map(String::as_str), Some("node-2"));
    assert!(descriptor.run_dir().join("node.pid").is_file());
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_and_restart() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).build().await;
    let fleet = &net.harness.fleet;
    let before = fleet.process(node(1)).await.unwrap().identity.unwrap();

    fleet.stop(node(1)).await.unwrap();
    assert_eq!(fleet.state(node(1)).await.unwrap(), NodeLifecycle::Stopped);
    assert!(net.chain.running_version(node(1)).is_none());
    fleet.stop(node(1)).await.expect("stopping a stopped node is a no-op");

    let after = fleet.restart(node(1)).await.unwrap();
    assert_ne!(before, after);
    assert_eq!(fleet.state(node(1)).await.unwrap(), NodeLifecycle::Running);
}

#[tokio::test(start_paused = true)]
async fn test_stop_escalates_to_kill_after_grace() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).build().await;
    net.supervisor.ignore_sigterm(node(2));
    let started = tokio::time::Instant::now();

    let err = net
        .harness
        .fleet
        .stop_with_grace(node(2), Duration::from_secs(3))
        .await
        .expect_err("SIGTERM is ignored");

    assert!(err.is_ungraceful_stop(), "got {err}");
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(
        net.harness.fleet.state(node(2)).await.unwrap(),
        NodeLifecycle::Stopped
    );
    let kinds: Vec<EventKind> = net
        .supervisor
        .events_for(node(2))
        .iter()
        .map(|e| e.kind)
        .skip(1)
        .collect();
    assert_eq!(kinds, vec![EventKind::TermIgnored, EventKind::Killed]);
}

#[tokio::test(start_paused = true)]
async fn test_crash_is_reported_not_restarted() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(3).build().await;
    let fleet = &net.harness.fleet;

    net.supervisor.crash(node(3));
    assert!(fleet.crash_check(node(3)).await.unwrap());
    assert_eq!(fleet.state(node(3)).await.unwrap(), NodeLifecycle::Crashed);
    assert_eq!(fleet.crash_check_all().await.unwrap(), vec![node(3)]);
    assert_eq!(net.supervisor.live_processes(node(3)), 0, "no automatic restart");

    fleet.start(node(3)).await.unwrap();
    assert_eq!(fleet.state(node(3)).await.unwrap(), NodeLifecycle::Running);
    assert!(fleet.crash_check_all().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_spawn_failure_leaves_node_stopped() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).started(false).build().await;
    net.supervisor.fail_spawn(node(2));

    let err = net.harness.fleet.start(node(2)).await.unwrap_err();
    match err {
        DevnetError::Process { node: failed, kind, .. } => {
            assert_eq!(failed, node(2));
            assert_eq!(kind, ProcessErrorKind::SpawnFailed);
        }
        other => panic!("expected a process error, got {other}"),
    }
    assert_eq!(
        net.harness.fleet.state(node(2)).await.unwrap(),
        NodeLifecycle::Stopped
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_node_is_rejected() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).build().await;
    let err = net.harness.fleet.start(node(9)).await.unwrap_err();
    assert!(matches!(
        err,
        DevnetError::Process {
            kind: ProcessErrorKind::UnknownNode,
            ..
        }
    ));
    assert!(net.harness.targets("node-9").is_err());
    assert_eq!(net.harness.targets("all").unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reopen_adopts_recorded_processes() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(3).build().await;
    net.supervisor.crash(node(2));

    let collaborators = Collaborators {
        rpc: net.chain.clone(),
        supervisor: net.supervisor.clone(),
        provenance: Arc::new(StagedBinaryStore::new(net.stages_dir(), "node")),
    };
    let reopened = Harness::open(net.harness.config.clone(), collaborators)
        .await
        .expect("network exists");

    assert_eq!(reopened.roster.members(), net.members());
    assert_eq!(
        reopened.fleet.state(node(1)).await.unwrap(),
        NodeLifecycle::Running
    );
    assert_eq!(
        reopened.fleet.state(node(2)).await.unwrap(),
        NodeLifecycle::Crashed,
        "a recorded process that vanished is a crash"
    );
    assert_eq!(
        reopened.fleet.start(node(1)).await.unwrap(),
        net.harness.fleet.process(node(1)).await.unwrap().identity.unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn test_teardown_stops_everything_and_removes_assets() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(3).build().await;
    let root = net.network_dir();
    let chain = net.chain.clone();
    assert!(root.join("network.toml").is_file());

    net.harness.teardown().await.unwrap();
    assert!(!root.exists());
    for index in 1..=3 {
        assert!(chain.running_version(node(index)).is_none());
    }
}
