//! Node process lifecycle

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// Lifecycle state of a node process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLifecycle {
    /// Not running, by request
    Stopped,
    /// Spawn in progress
    Starting,
    /// Process alive
    Running,
    /// Termination in progress
    Stopping,
    /// Exited without a requested stop
    Crashed,
}

impl fmt::Display for NodeLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeLifecycle::Stopped => "stopped",
            NodeLifecycle::Starting => "starting",
            NodeLifecycle::Running => "running",
            NodeLifecycle::Stopping => "stopping",
            NodeLifecycle::Crashed => "crashed",
        };
        f.write_str(label)
    }
}

/// Operating-system identity of a spawned node process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// Process id
    pub pid: u32,
}

/// Controller-side record of one node process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProcess {
    /// Node id
    pub node: NodeId,
    /// Current lifecycle state
    pub state: NodeLifecycle,
    /// Identity of the live process, if any
    pub identity: Option<ProcessIdentity>,
    /// Last time the process was confirmed alive
    pub last_seen: Option<DateTime<Utc>>,
}

impl NodeProcess {
    /// A record for a node that has never been started
    pub fn stopped(node: NodeId) -> Self {
        Self {
            node,
            state: NodeLifecycle::Stopped,
            identity: None,
            last_seen: None,
        }
    }

    /// Whether the record claims a live process
    pub fn is_running(&self) -> bool {
        self.state == NodeLifecycle::Running
    }
}
