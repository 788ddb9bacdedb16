//! Generated network assets

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chainspec::Chainspec;
use crate::ids::{NodeId, ProtocolVersion};
use crate::settings::NetworkSettings;

/// Listener ports assigned to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePorts {
    /// JSON-RPC port
    pub rpc: u16,
    /// Peer-to-peer port
    pub network: u16,
    /// Metrics port
    pub metrics: u16,
}

/// Per-node slice of the network assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Stable node id
    pub id: NodeId,
    /// `01`-prefixed hex ed25519 public key
    pub public_key: String,
    /// Assigned listener ports
    pub ports: NodePorts,
    /// Node directory (`nodes/node-N`)
    pub data_dir: PathBuf,
    /// Version the node is currently configured to run
    pub version: ProtocolVersion,
    /// Stake bonded at genesis or on join
    pub stake: u64,
}

impl NodeDescriptor {
    /// Key directory
    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    /// Directory holding the executable for `version`
    pub fn bin_dir(&self, version: &ProtocolVersion) -> PathBuf {
        self.data_dir.join("bin").join(version.dir_name())
    }

    /// Directory holding the chainspec and node config for `version`
    pub fn config_dir(&self, version: &ProtocolVersion) -> PathBuf {
        self.data_dir.join("config").join(version.dir_name())
    }

    /// Node config for the current version
    pub fn config_path(&self) -> PathBuf {
        self.config_dir(&self.version).join("config.toml")
    }

    /// Runtime state directory, preserved across restarts
    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join("storage")
    }

    /// Process log directory
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Pid file directory
    pub fn run_dir(&self) -> PathBuf {
        self.data_dir.join("run")
    }

    /// JSON-RPC endpoint
    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}/rpc", self.ports.rpc)
    }

    /// Metrics endpoint
    pub fn metrics_url(&self) -> String {
        format!("http://127.0.0.1:{}/metrics", self.ports.metrics)
    }

    /// Peer-to-peer address
    pub fn network_address(&self) -> String {
        format!("127.0.0.1:{}", self.ports.network)
    }
}

/// Everything generated for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAsset {
    /// Network name
    pub name: String,
    /// Network directory (`<root>/<name>`)
    pub root: PathBuf,
    /// Settings the network was generated from
    pub settings: NetworkSettings,
    /// Current network chainspec
    pub chainspec: Chainspec,
    /// Node descriptors in ascending id order
    pub nodes: Vec<NodeDescriptor>,
}

impl NetworkAsset {
    /// Descriptor for `id`
    pub fn node(&self, id: NodeId) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Mutable descriptor for `id`
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeDescriptor> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    /// All node ids in ascending order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|node| node.id).collect()
    }

    /// Next never-used id
    pub fn next_node_id(&self) -> NodeId {
        let highest = self.nodes.iter().map(|n| n.id.index()).max().unwrap_or(0);
        NodeId::new(highest.saturating_add(1))
    }

    /// Manifest path
    pub fn manifest_path(&self) -> PathBuf {
        manifest_path(&self.root)
    }

    /// Shared chainspec directory
    pub fn chainspec_dir(&self) -> PathBuf {
        self.root.join("chainspec")
    }

    /// Directory holding upgrade run records
    pub fn upgrades_dir(&self) -> PathBuf {
        self.root.join("upgrades")
    }

    /// Lock file held while an upgrade is activating
    pub fn phase_lock_path(&self) -> PathBuf {
        self.root.join("upgrade.lock")
    }

    /// Roster file
    pub fn roster_path(&self) -> PathBuf {
        self.root.join("roster.toml")
    }
}

/// Manifest location for a network directory
pub fn manifest_path(network_dir: &Path) -> PathBuf {
    network_dir.join("network.toml")
}

/// Template for a node added after genesis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTemplate {
    /// Stake to bond, defaults to the network's validator stake
    pub stake: Option<u64>,
    /// Version to run, defaults to the network's current chainspec version
    pub version: Option<ProtocolVersion>,
    /// Skip the bonding request even when the network models bonding
    pub skip_bonding: bool,
}
