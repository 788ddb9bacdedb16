//! Fleet membership

use serde::{Deserialize, Serialize};

use crate::errors::{DevnetError, Result};
use crate::ids::NodeId;

/// Authoritative list of admitted node ids.
///
/// Order is admission order, which is also the fallback order used when polling
/// "any reachable node" and the rollout order for rolling upgrades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetRoster {
    members: Vec<NodeId>,
    minimum: usize,
}

impl FleetRoster {
    /// Build a roster, rejecting an initial membership below `minimum`
    pub fn new(members: Vec<NodeId>, minimum: usize) -> Result<Self> {
        if members.len() < minimum {
            return Err(DevnetError::roster(
                "initial membership below minimum",
                members.len(),
                minimum,
            ));
        }
        let mut roster = Self {
            members: Vec::with_capacity(members.len()),
            minimum,
        };
        for node in members {
            roster.admit(node);
        }
        Ok(roster)
    }

    /// Members in roster order
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    /// Configured membership floor
    pub fn minimum(&self) -> usize {
        self.minimum
    }

    /// Membership size
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the roster has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `node` is admitted
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    /// Admit `node`; returns false when already a member
    pub fn admit(&mut self, node: NodeId) -> bool {
        if self.contains(node) {
            return false;
        }
        self.members.push(node);
        true
    }

    /// Check that evicting `node` is allowed without mutating anything
    pub fn check_evict(&self, node: NodeId) -> Result<()> {
        if !self.contains(node) {
            return Err(DevnetError::roster(
                format!("{node} is not a member"),
                self.len(),
                self.minimum,
            ));
        }
        if self.len() <= self.minimum {
            return Err(DevnetError::roster(
                format!("removing {node} would drop membership below the minimum"),
                self.len(),
                self.minimum,
            ));
        }
        Ok(())
    }

    /// Evict `node`, enforcing the minimum
    pub fn evict(&mut self, node: NodeId) -> Result<()> {
        self.check_evict(node)?;
        self.members.retain(|member| *member != node);
        Ok(())
    }
}
