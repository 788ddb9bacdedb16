//! Persisted fleet roster

use std::path::{Path, PathBuf};

use devnet_core::{DevnetError, FleetRoster, NodeId, Result};
use parking_lot::RwLock;
use tracing::info;

use crate::assets::{read_toml, write_toml};

/// Roster shared by the rotator, the await engine and the orchestrator.
///
/// Every mutation is written to `roster.toml` before it becomes visible.
pub struct RosterStore {
    path: PathBuf,
    roster: RwLock<FleetRoster>,
}

impl RosterStore {
    /// Create and persist a roster
    pub fn create(path: &Path, roster: FleetRoster) -> Result<Self> {
        write_toml(path, &roster)?;
        Ok(Self {
            path: path.to_path_buf(),
            roster: RwLock::new(roster),
        })
    }

    /// Load a persisted roster
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DevnetError::configuration(format!(
                "roster {} is missing",
                path.display()
            )));
        }
        let roster: FleetRoster = read_toml(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            roster: RwLock::new(roster),
        })
    }

    /// Members in roster order
    pub fn members(&self) -> Vec<NodeId> {
        self.roster.read().members().to_vec()
    }

    /// Copy of the roster
    pub fn snapshot(&self) -> FleetRoster {
        self.roster.read().clone()
    }

    /// Whether `node` is a member
    pub fn contains(&self, node: NodeId) -> bool {
        self.roster.read().contains(node)
    }

    /// Validate an eviction without changing anything
    pub fn check_evict(&self, node: NodeId) -> Result<()> {
        self.roster.read().check_evict(node)
    }

    /// Admit `node`
    pub fn admit(&self, node: NodeId) -> Result<()> {
        let mut roster = self.roster.write();
        let mut next = roster.clone();
        if next.admit(node) {
            write_toml(&self.path, &next)?;
            *roster = next;
            info!(%node, members = roster.len(), "admitted to roster");
        }
        Ok(())
    }

    /// Evict `node`, enforcing the minimum
    pub fn evict(&self, node: NodeId) -> Result<()> {
        let mut roster = self.roster.write();
        let mut next = roster.clone();
        next.evict(node)?;
        write_toml(&self.path, &next)?;
        *roster = next;
        info!(%node, members = roster.len(), "evicted from roster");
        Ok(())
    }
}
