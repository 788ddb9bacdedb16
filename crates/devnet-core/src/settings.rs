//! Declarative network settings consumed by asset generation

use std::ops::RangeInclusive;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::NodePorts;
use crate::errors::{DevnetError, Result};
use crate::ids::{NodeId, ProtocolVersion};

/// Settings describing the network to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Network name, also the directory name under the asset root
    pub name: String,
    /// Nodes created at setup
    pub node_count: u16,
    /// Membership floor enforced by `leave`
    pub minimum_nodes: u16,
    /// Port slots reserved, bounding later joins
    pub max_nodes: u16,
    /// Port bases, node `n` listens on `base + n`
    pub ports: PortSettings,
    /// Version installed at genesis
    pub initial_version: ProtocolVersion,
    /// Fixed genesis timestamp, `None` means now + `genesis_delay_secs`
    pub genesis_timestamp: Option<DateTime<Utc>>,
    /// Delay between setup and genesis when no timestamp is fixed
    pub genesis_delay_secs: u64,
    /// Validator slots written to the chainspec
    pub validator_slots: u32,
    /// Blocks per era written to the chainspec
    pub blocks_per_era: u64,
    /// Auction delay in eras
    pub auction_delay: u64,
    /// Unbonding delay in eras
    pub unbonding_delay: u64,
    /// Stake bonded by each genesis validator
    pub validator_stake: u64,
    /// Liquid balance of each genesis account
    pub account_balance: u64,
    /// Whether join/leave issue bonding requests
    pub bonding: bool,
}

/// Port bases for the three listeners each node opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// JSON-RPC listener base
    pub rpc_base: u16,
    /// Peer-to-peer listener base
    pub network_base: u16,
    /// Metrics listener base
    pub metrics_base: u16,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            rpc_base: 11100,
            network_base: 22100,
            metrics_base: 18100,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            name: "devnet-1".to_string(),
            node_count: 5,
            minimum_nodes: 1,
            max_nodes: 10,
            ports: PortSettings::default(),
            initial_version: ProtocolVersion::default(),
            genesis_timestamp: None,
            genesis_delay_secs: 30,
            validator_slots: 10,
            blocks_per_era: 10,
            auction_delay: 1,
            unbonding_delay: 7,
            validator_stake: 1_000_000_000_000,
            account_balance: 1_000_000_000_000_000,
            bonding: true,
        }
    }
}

impl NetworkSettings {
    /// Load settings from a TOML file
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DevnetError::configuration(format!("failed to read settings {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            DevnetError::configuration(format!("failed to parse settings {}: {e}", path.display()))
        })
    }

    /// Reject internally inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DevnetError::configuration("network name must not be empty"));
        }
        if self
            .name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(DevnetError::configuration(format!(
                "network name '{}' may only contain [A-Za-z0-9_-]",
                self.name
            )));
        }
        if self.node_count == 0 {
            return Err(DevnetError::configuration("node count must be at least 1"));
        }
        if self.minimum_nodes == 0 {
            return Err(DevnetError::configuration("minimum node count must be at least 1"));
        }
        if self.minimum_nodes > self.node_count {
            return Err(DevnetError::configuration(format!(
                "minimum node count {} exceeds node count {}",
                self.minimum_nodes, self.node_count
            )));
        }
        if self.max_nodes < self.node_count {
            return Err(DevnetError::configuration(format!(
                "max nodes {} is below node count {}",
                self.max_nodes, self.node_count
            )));
        }
        if self.blocks_per_era == 0 {
            return Err(DevnetError::configuration("blocks per era must be at least 1"));
        }
        if self.validator_slots < u32::from(self.node_count) {
            return Err(DevnetError::configuration(format!(
                "validator slots {} cannot seat {} genesis validators",
                self.validator_slots, self.node_count
            )));
        }

        let ranges = self.port_ranges()?;
        for (i, (label_a, a)) in ranges.iter().enumerate() {
            for (label_b, b) in ranges.iter().skip(i + 1) {
                if a.start() <= b.end() && b.start() <= a.end() {
                    return Err(DevnetError::configuration(format!(
                        "{label_a} ports {}..={} overlap {label_b} ports {}..={}",
                        a.start(),
                        a.end(),
                        b.start(),
                        b.end()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reserved port range for each listener kind
    pub fn port_ranges(&self) -> Result<Vec<(&'static str, RangeInclusive<u32>)>> {
        let span = u32::from(self.max_nodes);
        let range = |label: &'static str, base: u16| {
            let start = u32::from(base) + 1;
            let end = u32::from(base) + span;
            if end > u32::from(u16::MAX) {
                return Err(DevnetError::configuration(format!(
                    "{label} ports {start}..={end} exceed 65535"
                )));
            }
            Ok((label, start..=end))
        };
        Ok(vec![
            range("rpc", self.ports.rpc_base)?,
            range("network", self.ports.network_base)?,
            range("metrics", self.ports.metrics_base)?,
        ])
    }

    /// Ports assigned to `node`, `None` when outside the reserved capacity
    pub fn ports_for(&self, node: NodeId) -> Option<NodePorts> {
        if node.index() == 0 || node.index() > self.max_nodes {
            return None;
        }
        let offset = node.index();
        Some(NodePorts {
            rpc: self.ports.rpc_base.checked_add(offset)?,
            network: self.ports.network_base.checked_add(offset)?,
            metrics: self.ports.metrics_base.checked_add(offset)?,
        })
    }
}
