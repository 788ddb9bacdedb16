//! Upgrade handlers

use anyhow::Result;
use devnet_core::{ChainspecDelta, ProtocolVersion, RolloutStrategy, UpgradeRun};
use devnet_harness::{Cancellation, HarnessConfig};

use super::open_network;
use crate::UpgradeArgs;

/// Plan, stage, activate and verify a scheduled upgrade
pub async fn handle_upgrade(
    config: HarnessConfig,
    args: UpgradeArgs,
    cancel: &Cancellation,
) -> Result<()> {
    let harness = open_network(config).await?;
    let rollout = if args.rolling {
        RolloutStrategy::Rolling
    } else {
        RolloutStrategy::BigBang
    };
    let activation = match args.activate_at {
        Some(point) => point,
        None => harness.upgrades.next_era_boundary().await?,
    };
    let plan = harness
        .upgrades
        .plan(args.version, activation, rollout, args.lead)
        .await?
        .with_delta(slots_delta(args.validator_slots));
    println!(
        "Upgrading {} to {} at {activation} ({rollout:?})",
        harness.assets.name(),
        args.version,
    );
    let run = harness.upgrades.run(plan, Some(cancel)).await?;
    print_run(&run);
    Ok(())
}

/// Hard-reset the fleet onto `version` now
pub async fn handle_emergency(
    config: HarnessConfig,
    version: ProtocolVersion,
    validator_slots: Option<u32>,
    cancel: &Cancellation,
) -> Result<()> {
    let harness = open_network(config).await?;
    let run = harness
        .upgrades
        .emergency(version, slots_delta(validator_slots), Some(cancel))
        .await?;
    print_run(&run);
    Ok(())
}

fn slots_delta(validator_slots: Option<u32>) -> ChainspecDelta {
    ChainspecDelta {
        validator_slots,
        ..ChainspecDelta::default()
    }
}

fn print_run(run: &UpgradeRun) {
    println!("Upgrade {} {}", run.id, run.phase);
    for transition in &run.history {
        println!(
            "  {} {}",
            transition.at.format("%H:%M:%S%.3f"),
            transition.phase
        );
    }
}
