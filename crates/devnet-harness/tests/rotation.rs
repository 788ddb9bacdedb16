//! Joining and leaving nodes on a running network

use std::sync::Arc;

use devnet_core::{DevnetError, NodeId, NodeLifecycle, NodeTemplate, UpgradeErrorKind};
use devnet_harness::provenance::StagedBinaryStore;
use devnet_harness::{BondingOutcome, Collaborators, Harness};
use devnet_testkit::{init_test_logging, EventKind, TestNetworkBuilder};

fn node(index: u16) -> NodeId {
    NodeId::new(index)
}

#[tokio::test(start_paused = true)]
async fn test_join_admits_starts_and_bonds() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(3).start_height(20).build().await;

    let report = net
        .harness
        .rotator
        .join(&NodeTemplate {
            stake: Some(42),
            ..NodeTemplate::default()
        })
        .await
        .expect("join succeeds");

    assert_eq!(report.node, node(4));
    assert!(matches!(
        report.bonding,
        BondingOutcome::Submitted { via, .. } if via == node(1)
    ));
    assert_eq!(net.members(), vec![node(1), node(2), node(3), node(4)]);
    assert_eq!(
        net.harness.fleet.state(node(4)).await.unwrap(),
        NodeLifecycle::Running
    );

    let descriptor = net.harness.assets.node(node(4)).unwrap();
    let bids = net.chain.bids();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].amount, 42);
    assert_eq!(bids[0].public_key, descriptor.public_key);
    assert!(descriptor.keys_dir().join("secret_key.hex").is_file());
    assert_eq!(
        descriptor.ports.rpc,
        net.harness.assets.settings().ports.rpc_base + 4
    );
}

#[tokio::test(start_paused = true)]
async fn test_join_survives_rejected_bid() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).build().await;
    net.chain.reject_bonding(true);

    let report = net.harness.rotator.join(&NodeTemplate::default()).await.unwrap();
    assert!(matches!(report.bonding, BondingOutcome::Failed { .. }));
    assert!(net.harness.roster.contains(report.node));
    assert_eq!(
        net.harness.fleet.state(report.node).await.unwrap(),
        NodeLifecycle::Running
    );
}

#[tokio::test(start_paused = true)]
async fn test_join_without_bonding() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).bonding(false).build().await;

    let report = net.harness.rotator.join(&NodeTemplate::default()).await.unwrap();
    assert_eq!(report.bonding, BondingOutcome::Skipped);
    assert!(net.chain.bids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_join_start_failure_leaves_member_stopped() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).build().await;
    net.supervisor.fail_spawn(node(3));

    let err = net
        .harness
        .rotator
        .join(&NodeTemplate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DevnetError::Process { .. }), "got {err}");
    assert!(net.harness.roster.contains(node(3)));
    assert_eq!(
        net.harness.fleet.state(node(3)).await.unwrap(),
        NodeLifecycle::Stopped
    );
    assert!(net.chain.bids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_leave_unbonds_stops_and_evicts() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(4).minimum_nodes(3).build().await;

    net.harness.rotator.leave(node(2)).await.expect("4 -> 3 is allowed");

    assert_eq!(net.members(), vec![node(1), node(3), node(4)]);
    assert!(!net.harness.fleet.registered().contains(&node(2)));
    assert_eq!(net.chain.withdrawals().len(), 1);
    assert!(net.chain.running_version(node(2)).is_none());
    let last = net.supervisor.events_for(node(2)).last().copied().unwrap();
    assert_eq!(last.kind, EventKind::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_leave_respects_minimum() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(3).minimum_nodes(3).build().await;

    let err = net.harness.rotator.leave(node(3)).await.unwrap_err();
    match err {
        DevnetError::Roster { members, minimum, .. } => {
            assert_eq!((members, minimum), (3, 3));
        }
        other => panic!("expected a roster error, got {other}"),
    }
    assert!(net.harness.roster.contains(node(3)));
    assert_eq!(
        net.harness.fleet.state(node(3)).await.unwrap(),
        NodeLifecycle::Running,
        "nothing happened to the node"
    );
    assert!(net.chain.withdrawals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_leave_aborts_when_no_node_answers() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(3).build().await;
    for index in 1..=3 {
        net.chain.set_unreachable(node(index), true);
    }

    let err = net.harness.rotator.leave(node(2)).await.unwrap_err();
    assert!(matches!(err, DevnetError::RpcUnavailable { .. }), "got {err}");
    assert!(net.harness.roster.contains(node(2)));
    assert_eq!(
        net.harness.fleet.state(node(2)).await.unwrap(),
        NodeLifecycle::Running
    );
}

#[tokio::test(start_paused = true)]
async fn test_leave_forces_stubborn_node_out() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(3)
        .configure(|config| config.stop_grace_secs = 2)
        .build()
        .await;
    net.supervisor.ignore_sigterm(node(3));

    net.harness.rotator.leave(node(3)).await.expect("forced stop still evicts");
    assert!(!net.harness.roster.contains(node(3)));
    let last = net.supervisor.events_for(node(3)).last().copied().unwrap();
    assert_eq!(last.kind, EventKind::Killed);
}

#[tokio::test(start_paused = true)]
async fn test_ids_are_never_reused() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).build().await;
    let rotator = &net.harness.rotator;

    let joined = rotator.join(&NodeTemplate::default()).await.unwrap().node;
    rotator.leave(joined).await.unwrap();
    let rejoined = rotator.join(&NodeTemplate::default()).await.unwrap().node;

    assert_eq!(joined, node(3));
    assert_eq!(rejoined, node(4));
    assert_eq!(net.members(), vec![node(1), node(2), node(4)]);
}

#[tokio::test(start_paused = true)]
async fn test_membership_changes_wait_for_phase_lock() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(3).build().await;
    let _held = net.harness.phase_lock.try_acquire("upgrade").unwrap();

    for err in [
        net.harness.rotator.join(&NodeTemplate::default()).await.unwrap_err(),
        net.harness.rotator.leave(node(3)).await.unwrap_err(),
    ] {
        assert!(matches!(
            err,
            DevnetError::Upgrade {
                kind: UpgradeErrorKind::PhaseLocked,
                ..
            }
        ));
    }
    assert_eq!(net.members().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_roster_survives_reopen() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(3).minimum_nodes(2).build().await;
    net.harness.rotator.join(&NodeTemplate::default()).await.unwrap();
    net.harness.rotator.leave(node(1)).await.unwrap();

    let collaborators = Collaborators {
        rpc: net.chain.clone(),
        supervisor: net.supervisor.clone(),
        provenance: Arc::new(StagedBinaryStore::new(net.stages_dir(), "node")),
    };
    let reopened = Harness::open(net.harness.config.clone(), collaborators)
        .await
        .unwrap();
    assert_eq!(reopened.roster.members(), vec![node(2), node(3), node(4)]);
    assert_eq!(reopened.roster.snapshot().minimum(), 2);
    assert_eq!(
        reopened.fleet.state(node(4)).await.unwrap(),
        NodeLifecycle::Running
    );
}
