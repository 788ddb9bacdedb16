//! Unified error type for devnet operations
//!
//! Every orchestration operation returns [`DevnetError`]. The variants mirror the
//! failure classes an operator has to tell apart: bad settings, process control,
//! an unreachable node, an unmet wait, an upgrade failure and a roster breach.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chain::ChainSnapshot;
use crate::ids::NodeId;

/// Sub-kind of a process control failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessErrorKind {
    /// The node executable could not be launched
    SpawnFailed,
    /// A termination signal could not be delivered
    SignalFailed,
    /// The grace period expired and the process was force-killed
    UngracefulStop,
    /// The node id is not known to the fleet
    UnknownNode,
}

impl fmt::Display for ProcessErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessErrorKind::SpawnFailed => "spawn-failed",
            ProcessErrorKind::SignalFailed => "signal-failed",
            ProcessErrorKind::UngracefulStop => "ungraceful-stop",
            ProcessErrorKind::UnknownNode => "unknown-node",
        };
        f.write_str(label)
    }
}

/// Sub-kind of an upgrade failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeErrorKind {
    /// The target version or activation point did not validate while staging
    StageValidation,
    /// At least one node failed to come back during rollout
    PartialRolloutFailure,
    /// The fleet did not converge on the new version in time
    VerificationTimeout,
    /// Another upgrade holds the exclusive phase lock
    PhaseLocked,
}

impl fmt::Display for UpgradeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpgradeErrorKind::StageValidation => "stage-validation",
            UpgradeErrorKind::PartialRolloutFailure => "partial-rollout-failure",
            UpgradeErrorKind::VerificationTimeout => "verification-timeout",
            UpgradeErrorKind::PhaseLocked => "upgrade-in-progress",
        };
        f.write_str(label)
    }
}

/// Unified error type for all devnet operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum DevnetError {
    /// Settings were rejected before any side effect
    #[error("Configuration error: {message}")]
    Configuration {
        /// What was inconsistent
        message: String,
    },

    /// Starting, stopping or signalling a node process failed
    #[error("Process error ({kind}) on {node}: {message}")]
    Process {
        /// Node the operation targeted
        node: NodeId,
        /// Failure sub-kind
        kind: ProcessErrorKind,
        /// Details
        message: String,
    },

    /// A single node's RPC surface could not be reached
    #[error("RPC unavailable on {node}: {message}")]
    RpcUnavailable {
        /// Node that was polled
        node: NodeId,
        /// Underlying transport failure
        message: String,
    },

    /// An await condition was not met before its deadline
    #[error("Timed out waiting for {condition}{}", describe_last(.last))]
    Timeout {
        /// Human readable condition
        condition: String,
        /// Last snapshot observed, if any node was ever reachable
        last: Option<Box<ChainSnapshot>>,
    },

    /// A wait was abandoned by the operator
    #[error("Cancelled while waiting for {condition}{}", describe_last(.last))]
    Cancelled {
        /// Human readable condition
        condition: String,
        /// Last snapshot observed before cancellation
        last: Option<Box<ChainSnapshot>>,
    },

    /// Protocol upgrade failure
    #[error("Upgrade error ({kind}): {message}")]
    Upgrade {
        /// Failure sub-kind
        kind: UpgradeErrorKind,
        /// Nodes implicated in the failure
        nodes: Vec<NodeId>,
        /// Details
        message: String,
    },

    /// A membership change would breach the configured minimum
    #[error("Roster error: {message} (members: {members}, minimum: {minimum})")]
    Roster {
        /// Details
        message: String,
        /// Current membership size
        members: usize,
        /// Configured minimum
        minimum: usize,
    },

    /// Filesystem access failed
    #[error("Storage error: {message}")]
    Storage {
        /// Details
        message: String,
    },

    /// Encoding or decoding a manifest or payload failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// Details
        message: String,
    },
}

fn describe_last(last: &Option<Box<ChainSnapshot>>) -> String {
    match last {
        Some(snapshot) => format!(
            " (last observed: {} at height {} era {})",
            snapshot.node, snapshot.height, snapshot.era
        ),
        None => " (no node was reachable)".to_string(),
    }
}

impl DevnetError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a process error
    pub fn process(node: NodeId, kind: ProcessErrorKind, message: impl Into<String>) -> Self {
        Self::Process {
            node,
            kind,
            message: message.into(),
        }
    }

    /// Create an RPC unavailable error
    pub fn rpc_unavailable(node: NodeId, message: impl Into<String>) -> Self {
        Self::RpcUnavailable {
            node,
            message: message.into(),
        }
    }

    /// Create a timeout carrying the last observed snapshot
    pub fn timeout(condition: impl Into<String>, last: Option<ChainSnapshot>) -> Self {
        Self::Timeout {
            condition: condition.into(),
            last: last.map(Box::new),
        }
    }

    /// Create a cancellation carrying the last observed snapshot
    pub fn cancelled(condition: impl Into<String>, last: Option<ChainSnapshot>) -> Self {
        Self::Cancelled {
            condition: condition.into(),
            last: last.map(Box::new),
        }
    }

    /// Create an upgrade error
    pub fn upgrade(kind: UpgradeErrorKind, nodes: Vec<NodeId>, message: impl Into<String>) -> Self {
        Self::Upgrade {
            kind,
            nodes,
            message: message.into(),
        }
    }

    /// Create a roster error
    pub fn roster(message: impl Into<String>, members: usize, minimum: usize) -> Self {
        Self::Roster {
            message: message.into(),
            members,
            minimum,
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Last snapshot carried by a timeout or cancellation
    pub fn last_snapshot(&self) -> Option<&ChainSnapshot> {
        match self {
            Self::Timeout { last, .. } | Self::Cancelled { last, .. } => last.as_deref(),
            _ => None,
        }
    }

    /// Whether this is an ungraceful stop, which still leaves the node Stopped
    pub fn is_ungraceful_stop(&self) -> bool {
        matches!(
            self,
            Self::Process {
                kind: ProcessErrorKind::UngracefulStop,
                ..
            }
        )
    }

    /// Process exit code used by the `devnet` binary
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration { .. } => 2,
            Self::Process { .. } => 3,
            Self::RpcUnavailable { .. } => 4,
            Self::Timeout { .. } => 5,
            Self::Upgrade { .. } => 6,
            Self::Roster { .. } => 7,
            Self::Cancelled { .. } => 8,
            Self::Storage { .. } | Self::Serialization { .. } => 1,
        }
    }
}

/// Standard Result type for devnet operations
pub type Result<T> = std::result::Result<T, DevnetError>;

impl From<std::io::Error> for DevnetError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<toml::de::Error> for DevnetError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for DevnetError {
    fn from(err: toml::ser::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DevnetError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
