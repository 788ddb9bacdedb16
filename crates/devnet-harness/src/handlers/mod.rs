//! CLI command handlers
//!
//! Each invocation loads the harness config, opens (or creates) the named
//! network and runs one operation against it. Node processes outlive the
//! command; later invocations re-attach through their pid files.

use anyhow::{Context, Result};
use devnet_core::Predicate;
use devnet_harness::{Cancellation, Collaborators, Harness, HarnessConfig};

use crate::{Cli, Commands};

pub mod network;
pub mod nodes;
pub mod upgrade;
pub mod wait;

/// Route a parsed command line to its handler
pub async fn dispatch(cli: Cli, cancel: Cancellation) -> Result<()> {
    let mut config = HarnessConfig::load(Some(&cli.config))
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(network) = &cli.network {
        config.network = network.clone();
    }

    match cli.command {
        Commands::Setup(args) => network::handle_setup(config, args, cli.network.is_some()).await,
        Commands::Teardown => network::handle_teardown(config).await,
        Commands::Status => network::handle_status(config).await,
        Commands::Metrics { node } => network::handle_metrics(config, node).await,
        Commands::Start { target } => nodes::handle_start(config, &target).await,
        Commands::Stop { target, grace } => nodes::handle_stop(config, &target, grace).await,
        Commands::Restart { target } => nodes::handle_restart(config, &target).await,
        Commands::Join {
            stake,
            version,
            no_bond,
        } => nodes::handle_join(config, stake, version, no_bond).await,
        Commands::Leave { node } => nodes::handle_leave(config, node).await,
        Commands::AwaitBlocks { count, wait } => {
            wait::handle_wait(config, Predicate::HeightAdvancedBy(count), &wait, &cancel).await
        }
        Commands::AwaitUntilBlock { height, wait } => {
            wait::handle_wait(config, Predicate::HeightAtLeast(height), &wait, &cancel).await
        }
        Commands::AwaitEras { count, wait } => {
            wait::handle_wait(config, Predicate::EraAdvancedBy(count), &wait, &cancel).await
        }
        Commands::AwaitUntilEra { era, wait } => {
            wait::handle_wait(config, Predicate::EraAtLeast(era), &wait, &cancel).await
        }
        Commands::Upgrade(args) => upgrade::handle_upgrade(config, args, &cancel).await,
        Commands::EmergencyUpgrade {
            version,
            validator_slots,
        } => upgrade::handle_emergency(config, version, validator_slots, &cancel).await,
    }
}

/// Open the configured network with production collaborators
pub async fn open_network(config: HarnessConfig) -> Result<Harness> {
    let network = config.network.clone();
    let collaborators = Collaborators::production(&config)?;
    let harness = Harness::open(config, collaborators)
        .await
        .with_context(|| format!("opening network {network}"))?;
    Ok(harness)
}
