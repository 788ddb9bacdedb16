//! Per-node handlers: lifecycle and membership

use std::time::Duration;

use anyhow::Result;
use devnet_core::{NodeId, NodeTemplate, ProtocolVersion};
use devnet_harness::{BondingOutcome, HarnessConfig};
use tracing::warn;

use super::open_network;

/// Start `target` (a node or `all`)
pub async fn handle_start(config: HarnessConfig, target: &str) -> Result<()> {
    let harness = open_network(config).await?;
    let nodes = harness.targets(target)?;
    let mut first_error = None;
    for (node, result) in harness.fleet.start_all(&nodes).await {
        match result {
            Ok(identity) => println!("{node} running (pid {})", identity.pid),
            Err(e) => {
                eprintln!("{node}: {e}");
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), |e| Err(e.into()))
}

/// Stop `target`, escalating after `grace` seconds
pub async fn handle_stop(config: HarnessConfig, target: &str, grace: Option<u64>) -> Result<()> {
    let harness = open_network(config).await?;
    let grace = grace.map_or_else(|| harness.config.stop_grace(), Duration::from_secs);
    let nodes = harness.targets(target)?;
    for node in nodes {
        match harness.fleet.stop_with_grace(node, grace).await {
            Ok(()) => println!("{node} stopped"),
            Err(e) if e.is_ungraceful_stop() => {
                warn!(%node, "ignored SIGTERM, killed");
                println!("{node} stopped (forced)");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Restart `target`
pub async fn handle_restart(config: HarnessConfig, target: &str) -> Result<()> {
    let harness = open_network(config).await?;
    for node in harness.targets(target)? {
        let identity = harness.fleet.restart(node).await?;
        println!("{node} restarted (pid {})", identity.pid);
    }
    Ok(())
}

/// Add a node to the running network
pub async fn handle_join(
    config: HarnessConfig,
    stake: Option<u64>,
    version: Option<ProtocolVersion>,
    no_bond: bool,
) -> Result<()> {
    let harness = open_network(config).await?;
    let template = NodeTemplate {
        stake,
        version,
        skip_bonding: no_bond,
    };
    let report = harness.rotator.join(&template).await?;
    match report.bonding {
        BondingOutcome::Submitted { deploy_hash, via } => {
            println!("{} joined, bid {deploy_hash} submitted via {via}", report.node);
        }
        BondingOutcome::Skipped => println!("{} joined without bonding", report.node),
        BondingOutcome::Failed { reason } => {
            println!("{} joined but bonding failed: {reason}", report.node);
        }
    }
    Ok(())
}

/// Remove `node` from the network
pub async fn handle_leave(config: HarnessConfig, node: NodeId) -> Result<()> {
    let harness = open_network(config).await?;
    harness.rotator.leave(node).await?;
    println!(
        "{node} left, {} members remain",
        harness.roster.members().len()
    );
    Ok(())
}
