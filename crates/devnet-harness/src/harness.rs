//! Harness assembly
//!
//! Wires the components of one network together from a [`HarnessConfig`] and
//! a set of collaborators. Production collaborators talk to real processes and
//! endpoints; tests substitute simulated ones.

use std::sync::Arc;

use devnet_core::effects::{BinaryProvenance, NodeRpc, ProcessSupervisor};
use devnet_core::{
    DevnetError, FleetRoster, NetworkSettings, NodeId, ProtocolVersion, Result,
};
use rand::{CryptoRng, RngCore};
use tracing::{info, warn};

use crate::assets::AssetManager;
use crate::await_engine::AwaitEngine;
use crate::config::HarnessConfig;
use crate::fleet::FleetController;
use crate::monitor::ChainStateMonitor;
use crate::phase_lock::PhaseLock;
use crate::provenance::StagedBinaryStore;
use crate::retry::RetryPolicy;
use crate::roster::RosterStore;
use crate::rotator::{NodeSetRotator, RotatorSettings};
use crate::rpc::JsonRpcClient;
use crate::supervisor::OsSupervisor;
use crate::upgrade::{UpgradeOrchestrator, UpgradeSettings};

/// External effects the harness depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Node RPC
    pub rpc: Arc<dyn NodeRpc>,
    /// Process supervision
    pub supervisor: Arc<dyn ProcessSupervisor>,
    /// Build lookup
    pub provenance: Arc<dyn BinaryProvenance>,
}

impl Collaborators {
    /// Real processes, HTTP JSON-RPC and the configured stage directory
    pub fn production(config: &HarnessConfig) -> Result<Self> {
        let rpc = JsonRpcClient::new(config.rpc_timeout())
            .map_err(|e| DevnetError::configuration(e.to_string()))?;
        Ok(Self {
            rpc: Arc::new(rpc),
            supervisor: Arc::new(OsSupervisor::new()),
            provenance: Arc::new(StagedBinaryStore::new(
                config.stages_dir(),
                config.node_binary_name.clone(),
            )),
        })
    }
}

/// Every component of one network.
pub struct Harness {
    /// Configuration in effect
    pub config: HarnessConfig,
    /// On-disk assets
    pub assets: Arc<AssetManager>,
    /// Fleet membership
    pub roster: Arc<RosterStore>,
    /// Process lifecycle
    pub fleet: Arc<FleetController>,
    /// Chain observation
    pub monitor: Arc<ChainStateMonitor>,
    /// Condition waits
    pub engine: Arc<AwaitEngine>,
    /// Protocol upgrades
    pub upgrades: UpgradeOrchestrator,
    /// Membership changes
    pub rotator: NodeSetRotator,
    /// Exclusive fleet-wide lock
    pub phase_lock: PhaseLock,
}

impl Harness {
    /// Generate a new network, install its initial version and persist the
    /// roster. No node is started.
    pub async fn setup<R: RngCore + CryptoRng>(
        config: HarnessConfig,
        settings: &NetworkSettings,
        collaborators: Collaborators,
        rng: &mut R,
    ) -> Result<Self> {
        settings.validate()?;
        let artifacts = collaborators
            .provenance
            .fetch(&settings.initial_version)
            .await
            .map_err(|e| DevnetError::configuration(e.to_string()))?;

        let assets = AssetManager::generate(&config.root_dir, settings, rng)?;
        let members: Vec<NodeId> = assets.asset().node_ids();
        for node in &members {
            assets.install_binary(*node, &artifacts)?;
        }
        let roster = FleetRoster::new(members, usize::from(settings.minimum_nodes))?;
        let roster = RosterStore::create(&assets.asset().roster_path(), roster)?;
        info!(network = %settings.name, version = %settings.initial_version, "network set up");
        Self::assemble(config, assets, roster, collaborators)
    }

    /// Open an existing network and re-attach to its running processes
    pub async fn open(config: HarnessConfig, collaborators: Collaborators) -> Result<Self> {
        let assets = AssetManager::load(&config.root_dir, &config.network)?;
        let roster = RosterStore::load(&assets.asset().roster_path())?;
        let harness = Self::assemble(config, assets, roster, collaborators)?;
        harness.fleet.adopt().await?;
        Ok(harness)
    }

    fn assemble(
        config: HarnessConfig,
        assets: AssetManager,
        roster: RosterStore,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let launcher = config.resolve_launcher()?;
        let assets = Arc::new(assets);
        let roster = Arc::new(roster);
        let phase_lock = PhaseLock::new(&assets.asset().phase_lock_path());

        let fleet = Arc::new(FleetController::new(
            assets.clone(),
            collaborators.supervisor.clone(),
            launcher,
            config.stop_grace(),
        ));
        for node in roster.members() {
            fleet.register(node);
        }

        let retry = RetryPolicy::new(
            config.rpc_attempts,
            std::time::Duration::from_millis(config.rpc_backoff_ms),
        );
        let monitor = Arc::new(ChainStateMonitor::new(
            collaborators.rpc.clone(),
            assets.clone(),
            retry,
        ));
        let engine = Arc::new(AwaitEngine::new(monitor.clone(), roster.clone()));

        let upgrades = UpgradeOrchestrator::new(
            assets.clone(),
            fleet.clone(),
            monitor.clone(),
            engine.clone(),
            roster.clone(),
            collaborators.provenance.clone(),
            phase_lock.clone(),
            UpgradeSettings {
                poll_interval: config.poll_interval(),
                activation_timeout: config.activation_timeout(),
                verification_timeout: config.verification_timeout(),
                restart_settle: config.restart_settle(),
            },
        );
        let rotator = NodeSetRotator::new(
            assets.clone(),
            fleet.clone(),
            roster.clone(),
            collaborators.rpc.clone(),
            phase_lock.clone(),
            RotatorSettings {
                bonding: assets.settings().bonding,
                delegation_rate: config.delegation_rate,
                stop_grace: config.stop_grace(),
            },
        );

        Ok(Self {
            config,
            assets,
            roster,
            fleet,
            monitor,
            engine,
            upgrades,
            rotator,
            phase_lock,
        })
    }

    /// Resolve a `node-N`/`N`/`all` target to roster members
    pub fn targets(&self, target: &str) -> Result<Vec<NodeId>> {
        if target.eq_ignore_ascii_case("all") {
            return Ok(self.roster.members());
        }
        let node: NodeId = target.parse()?;
        if !self.roster.contains(node) {
            return Err(DevnetError::configuration(format!(
                "{node} is not a member of {}",
                self.assets.name()
            )));
        }
        Ok(vec![node])
    }

    /// Version currently configured for the network
    pub fn current_version(&self) -> ProtocolVersion {
        self.assets.chainspec().protocol.version
    }

    /// Stop every process the fleet knows about, then delete the network
    pub async fn teardown(self) -> Result<()> {
        let nodes = self.fleet.registered();
        for (node, result) in self.fleet.stop_all(&nodes).await {
            match result {
                Ok(()) => {}
                Err(e) if e.is_ungraceful_stop() => warn!(%node, "forced stop during teardown"),
                Err(e) => return Err(e),
            }
        }
        self.assets.teardown()
    }
}
