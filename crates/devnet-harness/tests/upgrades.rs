//! Upgrade orchestration end to end on a simulated fleet

use std::collections::BTreeSet;

use devnet_core::{
    ActivationPoint, ChainspecDelta, DevnetError, NodeId, NodeLifecycle, NodeTemplate,
    ProtocolVersion, RolloutStrategy, UpgradeErrorKind, UpgradePhase,
};
use devnet_testkit::{init_test_logging, EventKind, SupervisorEvent, TestNetworkBuilder};

const V1: ProtocolVersion = ProtocolVersion::new(1, 0, 0);
const V2: ProtocolVersion = ProtocolVersion::new(1, 1, 0);

fn node(index: u16) -> NodeId {
    NodeId::new(index)
}

fn upgrade_kind(err: &DevnetError) -> Option<UpgradeErrorKind> {
    match err {
        DevnetError::Upgrade { kind, .. } => Some(*kind),
        _ => None,
    }
}

fn swap_events(events: &[SupervisorEvent]) -> impl Iterator<Item = &SupervisorEvent> {
    events.iter().filter(|e| match e.kind {
        EventKind::Spawned(version) => version == V2,
        EventKind::Terminated | EventKind::Killed | EventKind::TermIgnored => true,
        EventKind::Crashed => false,
    })
}

#[tokio::test(start_paused = true)]
async fn test_big_bang_upgrade_at_height() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(4)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    let upgrades = &net.harness.upgrades;

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(200), RolloutStrategy::BigBang, 0)
        .await
        .expect("200 is ahead of 150");
    let run = upgrades.run(plan, None).await.expect("upgrade completes");

    assert_eq!(run.phase, UpgradePhase::Complete);
    for phase in [
        UpgradePhase::Planned,
        UpgradePhase::Staged,
        UpgradePhase::Activating,
        UpgradePhase::Verifying,
        UpgradePhase::Complete,
    ] {
        assert!(run.visited(phase), "run never entered {phase}");
    }
    assert_eq!(run.swapped.len(), 4);
    assert!(run.failed.is_empty());

    let events = net.supervisor.events();
    let swaps: Vec<&SupervisorEvent> = swap_events(&events).collect();
    assert_eq!(swaps.len(), 8, "one stop and one start per node");
    assert!(
        swaps.iter().all(|e| e.height >= 200),
        "no node was touched before the activation point"
    );

    for index in 1..=4 {
        assert_eq!(net.chain.running_version(node(index)), Some(V2));
        assert_eq!(net.harness.assets.node(node(index)).unwrap().version, V2);
    }
    assert_eq!(net.harness.current_version(), V2);
    assert!(!net.harness.phase_lock.is_held());

    let record = upgrades.record(&V2).unwrap().expect("run was persisted");
    assert_eq!(record.phase, UpgradePhase::Complete);
    assert_eq!(record.id, run.id);
}

#[tokio::test(start_paused = true)]
async fn test_default_activation_is_next_era() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(2)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    let upgrades = &net.harness.upgrades;

    let activation = upgrades.next_era_boundary().await.unwrap();
    assert_eq!(activation, ActivationPoint::EraId(16));
    let plan = upgrades
        .plan(V2, activation, RolloutStrategy::BigBang, 0)
        .await
        .expect("the next era is ahead");
    let run = upgrades.run(plan, None).await.unwrap();
    assert_eq!(run.phase, UpgradePhase::Complete);
    let events = net.supervisor.events();
    assert!(swap_events(&events).all(|e| e.height >= 160));
}

#[tokio::test(start_paused = true)]
async fn test_staging_leaves_running_nodes_alone() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(3)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    let upgrades = &net.harness.upgrades;
    let spawned_before = net.supervisor.events().len();

    let plan = upgrades
        .plan(V2, ActivationPoint::EraId(20), RolloutStrategy::BigBang, 0)
        .await
        .unwrap();
    let mut run = upgrades.begin(plan);
    upgrades.stage(&mut run).await.unwrap();

    assert_eq!(run.phase, UpgradePhase::Staged);
    assert_eq!(net.supervisor.events().len(), spawned_before);
    for index in 1..=3 {
        assert!(net.harness.assets.is_staged(node(index), &V2));
        assert_eq!(net.harness.assets.node(node(index)).unwrap().version, V1);
        assert_eq!(net.chain.running_version(node(index)), Some(V1));
    }
    assert_eq!(net.harness.current_version(), V1, "promoted only on completion");
}

#[tokio::test(start_paused = true)]
async fn test_rolling_upgrade_cycles_one_node_at_a_time() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(4)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    let upgrades = &net.harness.upgrades;

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(160), RolloutStrategy::Rolling, 0)
        .await
        .unwrap();
    let run = upgrades.run(plan, None).await.expect("rolling upgrade completes");
    assert_eq!(run.phase, UpgradePhase::Complete);
    assert_eq!(run.swapped, vec![node(1), node(2), node(3), node(4)]);

    let events = net.supervisor.events();
    let mut down: BTreeSet<NodeId> = BTreeSet::new();
    let mut stop_order = Vec::new();
    for event in swap_events(&events) {
        match event.kind {
            EventKind::Terminated | EventKind::Killed => {
                down.insert(event.node);
                stop_order.push(event.node);
            }
            EventKind::Spawned(_) => {
                down.remove(&event.node);
            }
            _ => {}
        }
        assert!(down.len() <= 1, "{down:?} down at once");
    }
    assert_eq!(stop_order, vec![node(1), node(2), node(3), node(4)]);
}

#[tokio::test(start_paused = true)]
async fn test_rolling_upgrade_halts_at_first_failure() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(4)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    net.supervisor.fail_spawn_on(node(2), V2);
    let upgrades = &net.harness.upgrades;

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(155), RolloutStrategy::Rolling, 0)
        .await
        .unwrap();
    let err = upgrades.run(plan, None).await.expect_err("node-2 cannot start on V2");

    assert_eq!(upgrade_kind(&err), Some(UpgradeErrorKind::PartialRolloutFailure));
    match &err {
        DevnetError::Upgrade { nodes, .. } => assert_eq!(nodes, &vec![node(2)]),
        other => panic!("unexpected {other}"),
    }

    assert_eq!(net.chain.running_version(node(1)), Some(V2));
    assert_eq!(net.chain.running_version(node(2)), None);
    assert_eq!(net.chain.running_version(node(3)), Some(V1));
    assert_eq!(net.chain.running_version(node(4)), Some(V1));
    assert_eq!(net.supervisor.events_for(node(3)).len(), 1, "node-3 untouched");

    let record = net.harness.upgrades.record(&V2).unwrap().unwrap();
    assert_eq!(record.phase, UpgradePhase::Failed);
    assert_eq!(record.swapped, vec![node(1)]);
    assert_eq!(record.failed, vec![node(2)]);
    assert!(!net.harness.phase_lock.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_big_bang_reports_nodes_that_fail_to_come_back() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(3)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    net.supervisor.crash_on_start(node(3), V2);
    let upgrades = &net.harness.upgrades;

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(152), RolloutStrategy::BigBang, 0)
        .await
        .unwrap();
    let err = upgrades.run(plan, None).await.unwrap_err();

    assert_eq!(upgrade_kind(&err), Some(UpgradeErrorKind::PartialRolloutFailure));
    match &err {
        DevnetError::Upgrade { nodes, .. } => assert_eq!(nodes, &vec![node(3)]),
        other => panic!("unexpected {other}"),
    }
    assert_eq!(net.chain.running_version(node(1)), Some(V2));
    let record = upgrades.record(&V2).unwrap().unwrap();
    assert_eq!(record.phase, UpgradePhase::Failed);
    assert!(!record.visited(UpgradePhase::Verifying));
}

#[tokio::test(start_paused = true)]
async fn test_activation_point_must_be_ahead() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(2)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    let upgrades = &net.harness.upgrades;

    for point in [ActivationPoint::Height(100), ActivationPoint::Height(150), ActivationPoint::EraId(15)] {
        let err = upgrades
            .plan(V2, point, RolloutStrategy::BigBang, 0)
            .await
            .expect_err("activation point is not ahead");
        assert_eq!(upgrade_kind(&err), Some(UpgradeErrorKind::StageValidation), "{point}");
        assert_eq!(err.exit_code(), 6);
    }

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(160), RolloutStrategy::BigBang, 0)
        .await
        .unwrap();
    let mut run = upgrades.begin(plan);
    tokio::time::sleep(std::time::Duration::from_secs(20)).await;
    let err = upgrades.stage(&mut run).await.expect_err("chain passed 160 before staging");
    assert_eq!(upgrade_kind(&err), Some(UpgradeErrorKind::StageValidation));
    assert_eq!(run.phase, UpgradePhase::Planned);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_build_fails_staging() {
    init_test_logging();
    let net = TestNetworkBuilder::new().nodes(2).start_height(150).build().await;
    let upgrades = &net.harness.upgrades;

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(200), RolloutStrategy::BigBang, 0)
        .await
        .unwrap();
    let mut run = upgrades.begin(plan);
    let err = upgrades.stage(&mut run).await.unwrap_err();
    assert_eq!(upgrade_kind(&err), Some(UpgradeErrorKind::StageValidation));
    assert!(!net.harness.assets.is_staged(node(1), &V2));
}

#[tokio::test(start_paused = true)]
async fn test_phase_lock_excludes_concurrent_activation() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(3)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    let upgrades = &net.harness.upgrades;
    let held = net.harness.phase_lock.try_acquire("other run").unwrap();

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(155), RolloutStrategy::BigBang, 0)
        .await
        .unwrap();
    let mut run = upgrades.begin(plan);
    upgrades.stage(&mut run).await.unwrap();
    let err = upgrades.activate(&mut run, None).await.unwrap_err();

    assert_eq!(upgrade_kind(&err), Some(UpgradeErrorKind::PhaseLocked));
    assert_eq!(err.to_string(), "Upgrade error (upgrade-in-progress): another fleet-wide operation is in progress");
    assert_eq!(run.phase, UpgradePhase::Failed);
    for index in 1..=3 {
        assert_eq!(net.chain.running_version(node(index)), Some(V1), "nothing swapped");
    }

    drop(held);
    assert!(!net.harness.phase_lock.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_member_joined_after_staging_blocks_swap() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(3)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    let upgrades = &net.harness.upgrades;

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(200), RolloutStrategy::BigBang, 0)
        .await
        .unwrap();
    let mut run = upgrades.begin(plan);
    upgrades.stage(&mut run).await.unwrap();
    let joined = net
        .harness
        .rotator
        .join(&NodeTemplate::default())
        .await
        .unwrap()
        .node;
    assert_eq!(joined, node(4));

    let err = upgrades.activate(&mut run, None).await.unwrap_err();
    match &err {
        DevnetError::Upgrade { kind, nodes, .. } => {
            assert_eq!(*kind, UpgradeErrorKind::StageValidation);
            assert_eq!(nodes, &vec![node(4)]);
        }
        other => panic!("expected an upgrade error, got {other}"),
    }
    assert_eq!(run.phase, UpgradePhase::Failed);
    assert_eq!(run.failed, vec![node(4)]);
    assert!(run.swapped.is_empty());
    for index in 1..=4 {
        assert_eq!(
            net.harness.fleet.state(node(index)).await.unwrap(),
            NodeLifecycle::Running,
            "node-{index} was left alone"
        );
        assert_eq!(net.chain.running_version(node(index)), Some(V1));
    }
    assert!(!net.harness.phase_lock.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_emergency_upgrade_waits_for_phase_lock_before_writing() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(3)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    let held = net.harness.phase_lock.try_acquire("join").unwrap();

    let err = net
        .harness
        .upgrades
        .emergency(V2, ChainspecDelta::default(), None)
        .await
        .unwrap_err();

    assert_eq!(upgrade_kind(&err), Some(UpgradeErrorKind::PhaseLocked));
    for index in 1..=3 {
        assert!(!net.harness.assets.is_staged(node(index), &V2), "no assets written");
        assert_eq!(net.chain.running_version(node(index)), Some(V1));
    }
    assert!(net.harness.upgrades.record(&V2).unwrap().is_none());
    drop(held);
}

#[tokio::test(start_paused = true)]
async fn test_verification_times_out_on_lagging_node() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(3)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    net.chain.freeze_node(node(3), Some(170));
    let upgrades = &net.harness.upgrades;

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(180), RolloutStrategy::BigBang, 0)
        .await
        .unwrap();
    let err = upgrades.run(plan, None).await.expect_err("node-3 never reaches 180");

    assert_eq!(upgrade_kind(&err), Some(UpgradeErrorKind::VerificationTimeout));
    match &err {
        DevnetError::Upgrade { nodes, .. } => assert_eq!(nodes, &vec![node(3)]),
        other => panic!("unexpected {other}"),
    }
    let record = upgrades.record(&V2).unwrap().unwrap();
    assert_eq!(record.phase, UpgradePhase::Failed);
    assert!(record.visited(UpgradePhase::Verifying));
    assert_eq!(record.failed, vec![node(3)]);
    assert_eq!(net.harness.current_version(), V1, "no promotion without convergence");
}

#[tokio::test(start_paused = true)]
async fn test_lead_starts_swap_early() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(2)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    let upgrades = &net.harness.upgrades;

    let plan = upgrades
        .plan(V2, ActivationPoint::Height(200), RolloutStrategy::BigBang, 10)
        .await
        .unwrap();
    upgrades.run(plan, None).await.unwrap();

    let events = net.supervisor.events();
    let first_stop = swap_events(&events).next().expect("nodes were cycled");
    assert!(
        first_stop.height >= 190 && first_stop.height < 200,
        "swap began at {}",
        first_stop.height
    );
}

#[tokio::test(start_paused = true)]
async fn test_emergency_upgrade_restarts_stalled_chain() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(3)
        .start_height(150)
        .stage(V2)
        .build()
        .await;
    net.chain.halt();

    let run = net
        .harness
        .upgrades
        .emergency(
            V2,
            ChainspecDelta {
                validator_slots: Some(7),
                ..ChainspecDelta::default()
            },
            None,
        )
        .await
        .expect("emergency upgrade completes");

    assert_eq!(run.phase, UpgradePhase::Complete);
    assert!(run.plan.emergency);
    assert!(!run.visited(UpgradePhase::Staged));
    assert_eq!(run.plan.activation, ActivationPoint::EraId(15));

    let chainspec = net.harness.assets.chainspec();
    assert_eq!(chainspec.protocol.version, V2);
    assert!(chainspec.protocol.hard_reset);
    assert_eq!(chainspec.protocol.last_emergency_restart, Some(15));
    assert_eq!(chainspec.core.validator_slots, 7);
    for index in 1..=3 {
        assert_eq!(net.chain.running_version(node(index)), Some(V2));
    }
}

#[tokio::test(start_paused = true)]
async fn test_emergency_upgrade_recovers_crashed_fleet() {
    init_test_logging();
    let net = TestNetworkBuilder::new()
        .nodes(2)
        .start_height(40)
        .stage(V2)
        .build()
        .await;
    for index in 1..=2 {
        net.supervisor.crash(node(index));
    }

    let run = net
        .harness
        .upgrades
        .emergency(V2, ChainspecDelta::default(), None)
        .await
        .expect("crashed nodes are restarted on the new version");

    assert_eq!(run.plan.activation, ActivationPoint::EraId(0), "nothing was reachable");
    assert_eq!(run.phase, UpgradePhase::Complete);
    for index in 1..=2 {
        assert_eq!(net.chain.running_version(node(index)), Some(V2));
    }
}
