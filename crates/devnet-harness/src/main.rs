//! `devnet` command line
//!
//! Thin front end over the harness library. Exit status reflects the failure
//! class: 2 configuration, 3 process, 4 RPC, 5 timeout, 6 upgrade, 7 roster,
//! 8 cancelled, 1 anything else.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use devnet_core::{ActivationPoint, DevnetError, NodeId, ProtocolVersion};
use devnet_harness::Cancellation;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod handlers;

#[derive(Parser)]
#[command(name = "devnet")]
#[command(about = "Local multi-node network harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Harness config file
    #[arg(short, long, global = true, default_value = "devnet.toml")]
    config: PathBuf,

    /// Network to operate on, overrides the config file
    #[arg(long, global = true)]
    network: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate assets for a new network
    Setup(SetupArgs),
    /// Stop every node and delete the network's assets
    Teardown,
    /// Start a node, or `all`
    Start {
        /// `node-N`, `N` or `all`
        target: String,
    },
    /// Stop a node, or `all`
    Stop {
        /// `node-N`, `N` or `all`
        target: String,
        /// Seconds before escalating to SIGKILL
        #[arg(long)]
        grace: Option<u64>,
    },
    /// Restart a node, or `all`
    Restart {
        /// `node-N`, `N` or `all`
        target: String,
    },
    /// Show process and chain state of every member
    Status,
    /// Add a node to the running network
    Join {
        /// Stake to bond
        #[arg(long)]
        stake: Option<u64>,
        /// Version to run, defaults to the network's version
        #[arg(long)]
        version: Option<ProtocolVersion>,
        /// Do not submit a bid
        #[arg(long)]
        no_bond: bool,
    },
    /// Remove a node from the network
    Leave {
        /// Node to remove
        node: NodeId,
    },
    /// Wait until the chain advances by COUNT blocks
    AwaitBlocks {
        /// Blocks to wait for
        count: u64,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Wait until the chain reaches HEIGHT
    AwaitUntilBlock {
        /// Target height
        height: u64,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Wait until the chain advances by COUNT eras
    AwaitEras {
        /// Eras to wait for
        count: u64,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Wait until the chain reaches ERA
    AwaitUntilEra {
        /// Target era
        era: u64,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Schedule and run a protocol upgrade
    Upgrade(UpgradeArgs),
    /// Restart a stalled network on a new version immediately
    EmergencyUpgrade {
        /// Version to install
        version: ProtocolVersion,
        /// Override validator slots in the new chainspec
        #[arg(long)]
        validator_slots: Option<u32>,
    },
    /// Print a node's metrics
    Metrics {
        /// Node to scrape
        node: NodeId,
    },
}

#[derive(Args)]
struct SetupArgs {
    /// Network settings file
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Override the node count
    #[arg(long)]
    nodes: Option<u16>,
    /// Override the initial version
    #[arg(long)]
    version: Option<ProtocolVersion>,
    /// Seed key generation for reproducible assets
    #[arg(long)]
    seed: Option<u64>,
    /// Start every node once assets are generated
    #[arg(long)]
    start: bool,
}

#[derive(Args, Clone, Default)]
struct WaitArgs {
    /// Timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Poll interval in milliseconds
    #[arg(long)]
    poll: Option<u64>,
    /// Poll only this node
    #[arg(long)]
    node: Option<NodeId>,
}

#[derive(Args)]
struct UpgradeArgs {
    /// Version to install
    version: ProtocolVersion,
    /// `height:N` or `era:N`; defaults to the start of the next era
    #[arg(long, value_parser = parse_activation)]
    activate_at: Option<ActivationPoint>,
    /// Cycle nodes one at a time instead of all at once
    #[arg(long)]
    rolling: bool,
    /// Start the swap this many units before the activation point
    #[arg(long, default_value = "0")]
    lead: u64,
    /// Override validator slots in the new chainspec
    #[arg(long)]
    validator_slots: Option<u32>,
}

fn parse_activation(value: &str) -> Result<ActivationPoint, String> {
    let (kind, number) = value
        .split_once(':')
        .ok_or_else(|| format!("expected height:N or era:N, got '{value}'"))?;
    let number: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("'{number}' is not a number"))?;
    match kind.trim() {
        "height" => Ok(ActivationPoint::Height(number)),
        "era" => Ok(ActivationPoint::EraId(number)),
        other => Err(format!("unknown activation kind '{other}'")),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<DevnetError>()
        .map(DevnetError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = Cancellation::new();
    let interrupt = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || interrupt.cancel()) {
        warn!(error = %e, "could not install interrupt handler");
    }

    match handlers::dispatch(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_activation() {
        assert_eq!(parse_activation("height:200"), Ok(ActivationPoint::Height(200)));
        assert_eq!(parse_activation("era:4"), Ok(ActivationPoint::EraId(4)));
        assert!(parse_activation("block:4").is_err());
        assert!(parse_activation("era").is_err());
    }

    #[test]
    fn test_upgrade_command_line() {
        let cli = Cli::try_parse_from([
            "devnet",
            "upgrade",
            "1.1.0",
            "--activate-at",
            "height:200",
            "--rolling",
            "--lead",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Upgrade(args) => {
                assert_eq!(args.version, ProtocolVersion::new(1, 1, 0));
                assert_eq!(args.activate_at, Some(ActivationPoint::Height(200)));
                assert!(args.rolling);
                assert_eq!(args.lead, 5);
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn test_upgrade_activation_is_optional() {
        let cli = Cli::try_parse_from(["devnet", "upgrade", "1.1.0"]).unwrap();
        match cli.command {
            Commands::Upgrade(args) => {
                assert_eq!(args.version, ProtocolVersion::new(1, 1, 0));
                assert_eq!(args.activate_at, None);
                assert!(!args.rolling);
                assert_eq!(args.lead, 0);
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn test_wait_flags_and_node_ids() {
        let cli = Cli::try_parse_from([
            "devnet",
            "--network",
            "lab",
            "await-until-block",
            "110",
            "--timeout",
            "30",
            "--node",
            "node-2",
        ])
        .unwrap();
        assert_eq!(cli.network.as_deref(), Some("lab"));
        match cli.command {
            Commands::AwaitUntilBlock { height, wait } => {
                assert_eq!(height, 110);
                assert_eq!(wait.timeout, Some(30));
                assert_eq!(wait.node, Some(NodeId::new(2)));
            }
            _ => panic!("expected await-until-block"),
        }
        assert!(Cli::try_parse_from(["devnet", "leave", "node-0"]).is_err());
    }

    #[test]
    fn test_exit_codes_follow_error_class() {
        let err = anyhow::Error::new(DevnetError::roster("below minimum", 3, 3));
        assert_eq!(exit_code(&err), 7);
        let err = anyhow::Error::new(DevnetError::timeout("height >= 10", None)).context("await");
        assert_eq!(exit_code(&err), 5);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
