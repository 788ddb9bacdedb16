//! Test network fixture
//!
//! Builds a real [`Harness`] in a temporary directory, wired to a
//! [`SimulatedChain`] and a [`MockSupervisor`]. Staged builds are dummy
//! executables under `<tmp>/stages`, read through the production
//! [`StagedBinaryStore`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use devnet_core::{NetworkSettings, NodeId, ProtocolVersion};
use devnet_harness::provenance::StagedBinaryStore;
use devnet_harness::{Collaborators, Harness, HarnessConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tempfile::TempDir;

use crate::chain::{ChainParams, SimulatedChain};
use crate::supervisor::MockSupervisor;

/// Name given to every test network
pub const TEST_NETWORK: &str = "testnet";

/// Builder for a [`TestNetwork`].
#[derive(Debug, Clone)]
pub struct TestNetworkBuilder {
    nodes: u16,
    minimum_nodes: u16,
    max_nodes: u16,
    version: ProtocolVersion,
    staged: Vec<ProtocolVersion>,
    chain: ChainParams,
    bonding: bool,
    started: bool,
    seed: u64,
    config: HarnessConfig,
}

impl Default for TestNetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNetworkBuilder {
    /// Five nodes on 1.0.0, one block per second, nodes started
    pub fn new() -> Self {
        Self {
            nodes: 5,
            minimum_nodes: 1,
            max_nodes: 10,
            version: ProtocolVersion::new(1, 0, 0),
            staged: Vec::new(),
            chain: ChainParams::default(),
            bonding: true,
            started: true,
            seed: 7,
            config: HarnessConfig {
                network: TEST_NETWORK.to_string(),
                poll_interval_ms: 1_000,
                await_timeout_secs: 300,
                stop_grace_secs: 10,
                rpc_attempts: 1,
                rpc_backoff_ms: 100,
                activation_timeout_secs: 3_600,
                verification_timeout_secs: 60,
                restart_settle_ms: 500,
                ..HarnessConfig::default()
            },
        }
    }

    /// Genesis node count
    pub fn nodes(mut self, nodes: u16) -> Self {
        self.nodes = nodes;
        self
    }

    /// Roster floor
    pub fn minimum_nodes(mut self, minimum: u16) -> Self {
        self.minimum_nodes = minimum;
        self
    }

    /// Genesis version
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Make a build for `version` available for upgrades
    pub fn stage(mut self, version: ProtocolVersion) -> Self {
        self.staged.push(version);
        self
    }

    /// Chain height when the fixture is built
    pub fn start_height(mut self, height: u64) -> Self {
        self.chain.start_height = height;
        self
    }

    /// Time per block
    pub fn block_interval(mut self, interval: Duration) -> Self {
        self.chain.block_interval = interval;
        self
    }

    /// Blocks per era
    pub fn blocks_per_era(mut self, blocks: u64) -> Self {
        self.chain.blocks_per_era = blocks;
        self
    }

    /// Whether joins and leaves bond
    pub fn bonding(mut self, bonding: bool) -> Self {
        self.bonding = bonding;
        self
    }

    /// Whether genesis nodes are started by `build`
    pub fn started(mut self, started: bool) -> Self {
        self.started = started;
        self
    }

    /// Adjust the harness config before assembly
    pub fn configure(mut self, f: impl FnOnce(&mut HarnessConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Create the directory, assets, chain and harness
    pub async fn build(self) -> TestNetwork {
        let dir = tempfile::tempdir().expect("create temp dir");
        let stages = dir.path().join("stages");
        for version in std::iter::once(&self.version).chain(&self.staged) {
            write_stage(&stages, version);
        }

        let mut config = self.config;
        config.root_dir = dir.path().join("networks");
        config.stages_dir = Some(stages.clone());

        let settings = NetworkSettings {
            name: config.network.clone(),
            node_count: self.nodes,
            minimum_nodes: self.minimum_nodes,
            max_nodes: self.max_nodes.max(self.nodes),
            initial_version: self.version,
            genesis_timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single(),
            blocks_per_era: self.chain.blocks_per_era,
            validator_slots: u32::from(self.max_nodes.max(self.nodes)),
            bonding: self.bonding,
            ..NetworkSettings::default()
        };

        let chain = Arc::new(SimulatedChain::new(self.chain));
        let supervisor = Arc::new(MockSupervisor::new(chain.clone()));
        let collaborators = Collaborators {
            rpc: chain.clone(),
            supervisor: supervisor.clone(),
            provenance: Arc::new(StagedBinaryStore::new(stages, "node")),
        };

        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        let harness = Harness::setup(config, &settings, collaborators, &mut rng)
            .await
            .expect("set up test network");

        if self.started {
            let members = harness.roster.members();
            for (node, result) in harness.fleet.start_all(&members).await {
                result.unwrap_or_else(|e| panic!("{node} failed to start: {e}"));
            }
        }

        TestNetwork {
            harness,
            chain,
            supervisor,
            dir,
        }
    }
}

/// A running test network.
pub struct TestNetwork {
    /// The harness under test
    pub harness: Harness,
    /// Simulated chain behind every node's RPC
    pub chain: Arc<SimulatedChain>,
    /// Supervisor standing in for the OS
    pub supervisor: Arc<MockSupervisor>,
    /// Owns every file; removed on drop
    pub dir: TempDir,
}

impl TestNetwork {
    /// Current members
    pub fn members(&self) -> Vec<NodeId> {
        self.harness.roster.members()
    }

    /// Network directory
    pub fn network_dir(&self) -> PathBuf {
        self.harness.assets.root()
    }

    /// Stage directory
    pub fn stages_dir(&self) -> PathBuf {
        self.dir.path().join("stages")
    }
}

/// Write a dummy build for `version` under `stages`
pub fn write_stage(stages: &Path, version: &ProtocolVersion) -> PathBuf {
    let dir = stages.join(version.dir_name());
    std::fs::create_dir_all(&dir).expect("create stage dir");
    let binary = dir.join("node");
    std::fs::write(&binary, format!("#!/bin/sh\n# node {version}\n")).expect("write stage binary");
    binary
}
