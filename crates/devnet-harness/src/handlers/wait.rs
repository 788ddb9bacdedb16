//! Condition waits

use std::time::Duration;

use anyhow::Result;
use devnet_core::{AwaitCondition, Predicate};
use devnet_harness::{Cancellation, HarnessConfig};

use super::open_network;
use crate::WaitArgs;

/// Block until `predicate` holds, printing the satisfying observation
pub async fn handle_wait(
    config: HarnessConfig,
    predicate: Predicate,
    args: &WaitArgs,
    cancel: &Cancellation,
) -> Result<()> {
    let condition = build_condition(&config, predicate, args);
    let harness = open_network(config).await?;
    let snapshot = harness
        .engine
        .wait_with_cancel(&condition, Some(cancel))
        .await?;
    println!(
        "{} satisfied on {}: height {} era {}",
        condition.predicate, snapshot.node, snapshot.height, snapshot.era
    );
    Ok(())
}

fn build_condition(config: &HarnessConfig, predicate: Predicate, args: &WaitArgs) -> AwaitCondition {
    let poll = args
        .poll
        .map_or_else(|| config.poll_interval(), Duration::from_millis);
    let timeout = args
        .timeout
        .map_or_else(|| config.await_timeout(), Duration::from_secs);
    let condition = AwaitCondition::new(predicate)
        .with_poll_interval(poll)
        .with_timeout(timeout);
    match args.node {
        Some(node) => condition.pinned_to(node),
        None => condition,
    }
}
