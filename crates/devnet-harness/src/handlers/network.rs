//! Network-wide handlers: setup, teardown, status and metrics

use anyhow::{Context, Result};
use devnet_core::{NetworkSettings, NodeId};
use devnet_harness::{Collaborators, Harness, HarnessConfig};
use rand::rngs::OsRng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use super::open_network;
use crate::SetupArgs;

/// Generate a network, optionally starting every node
pub async fn handle_setup(
    mut config: HarnessConfig,
    args: SetupArgs,
    network_overridden: bool,
) -> Result<()> {
    let mut settings = match &args.settings {
        Some(path) => NetworkSettings::from_path(path)?,
        None => NetworkSettings::default(),
    };
    if network_overridden || args.settings.is_none() {
        settings.name = config.network.clone();
    } else {
        config.network = settings.name.clone();
    }
    if let Some(nodes) = args.nodes {
        settings.node_count = nodes;
    }
    if let Some(version) = args.version {
        settings.initial_version = version;
    }

    let collaborators = Collaborators::production(&config)?;
    let harness = match args.seed {
        Some(seed) => {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            Harness::setup(config, &settings, collaborators, &mut rng).await?
        }
        None => Harness::setup(config, &settings, collaborators, &mut OsRng).await?,
    };

    let asset = harness.assets.asset();
    println!("Network {} created at {}", asset.name, asset.root.display());
    for node in &asset.nodes {
        println!("  {:<8} {}  rpc {}", node.id, node.version, node.rpc_url());
    }

    if args.start {
        let members = harness.roster.members();
        let mut failed = 0usize;
        for (node, result) in harness.fleet.start_all(&members).await {
            match result {
                Ok(identity) => println!("  {node} started (pid {})", identity.pid),
                Err(e) => {
                    failed += 1;
                    eprintln!("  {node} failed to start: {e}");
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{failed} of {} nodes failed to start", members.len());
        }
    }
    Ok(())
}

/// Stop every node and delete the network
pub async fn handle_teardown(config: HarnessConfig) -> Result<()> {
    let harness = open_network(config).await?;
    let name = harness.assets.name();
    let root = harness.assets.root();
    harness.teardown().await.context("tearing down")?;
    println!("Network {name} removed ({})", root.display());
    Ok(())
}

/// Process and chain state of every member
pub async fn handle_status(config: HarnessConfig) -> Result<()> {
    let harness = open_network(config).await?;
    let members = harness.roster.members();
    let processes = harness.fleet.status().await;
    let snapshots = harness.monitor.fleet_snapshots(&members).await;

    println!(
        "Network {} (chainspec {}, {} members)",
        harness.assets.name(),
        harness.current_version(),
        members.len()
    );
    println!(
        "{:<8} {:<9} {:>8} {:>9} {:>8} {:>6} {:>6}",
        "NODE", "STATE", "PID", "VERSION", "HEIGHT", "ERA", "PEERS"
    );
    for (node, snapshot) in snapshots {
        let process = processes.iter().find(|p| p.node == node);
        let state = process.map_or_else(|| "unknown".to_string(), |p| p.state.to_string());
        let pid = process
            .and_then(|p| p.identity)
            .map_or_else(|| "-".to_string(), |identity| identity.pid.to_string());
        match snapshot {
            Ok(s) => println!(
                "{:<8} {:<9} {:>8} {:>9} {:>8} {:>6} {:>6}",
                node.to_string(),
                state,
                pid,
                s.protocol_version.to_string(),
                s.height,
                s.era,
                s.peers
            ),
            Err(_) => println!(
                "{:<8} {:<9} {:>8} {:>9} {:>8} {:>6} {:>6}",
                node.to_string(),
                state,
                pid,
                "-",
                "-",
                "-",
                "-"
            ),
        }
    }
    Ok(())
}

/// Scrape and print one node's metrics
pub async fn handle_metrics(config: HarnessConfig, node: NodeId) -> Result<()> {
    let harness = open_network(config).await?;
    let metrics = harness.monitor.metrics(node).await?;
    for (name, value) in &metrics.samples {
        println!("{name} {value}");
    }
    Ok(())
}
