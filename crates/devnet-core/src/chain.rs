//! Observed chain state and activation points

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, ProtocolVersion};

/// The point on the chain at which a staged protocol version takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationPoint {
    /// First block height running the new version
    Height(u64),
    /// First era running the new version
    EraId(u64),
}

impl ActivationPoint {
    /// Value in the point's own unit
    pub fn value(&self) -> u64 {
        match self {
            ActivationPoint::Height(height) => *height,
            ActivationPoint::EraId(era) => *era,
        }
    }

    /// The snapshot's coordinate in the same unit as this point
    pub fn observed(&self, snapshot: &ChainSnapshot) -> u64 {
        match self {
            ActivationPoint::Height(_) => snapshot.height,
            ActivationPoint::EraId(_) => snapshot.era,
        }
    }

    /// Whether `snapshot` is at or past `self - lead`
    pub fn is_reached_by(&self, snapshot: &ChainSnapshot, lead: u64) -> bool {
        self.observed(snapshot) >= self.value().saturating_sub(lead)
    }

    /// A plan may only target a point strictly ahead of what has been observed
    pub fn is_ahead_of(&self, snapshot: &ChainSnapshot) -> bool {
        self.value() > self.observed(snapshot)
    }

    /// Same kind of point shifted back by `lead`
    pub fn minus(&self, lead: u64) -> Self {
        match self {
            ActivationPoint::Height(height) => ActivationPoint::Height(height.saturating_sub(lead)),
            ActivationPoint::EraId(era) => ActivationPoint::EraId(era.saturating_sub(lead)),
        }
    }
}

impl fmt::Display for ActivationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationPoint::Height(height) => write!(f, "activation point height {height}"),
            ActivationPoint::EraId(era) => write!(f, "activation point era {era}"),
        }
    }
}

/// One normalized observation of a node's chain state.
///
/// Snapshots are immutable values; a newer observation is a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Node that answered the query
    pub node: NodeId,
    /// Height of the last added block (0 before genesis)
    pub height: u64,
    /// Era of the last added block
    pub era: u64,
    /// State root of the last added block, absent before genesis
    pub state_root: Option<String>,
    /// Number of connected peers
    pub peers: u32,
    /// Protocol version the node reports running
    pub protocol_version: ProtocolVersion,
    /// When the observation was taken
    pub captured_at: DateTime<Utc>,
}
