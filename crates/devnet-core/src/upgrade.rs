//! Upgrade plans and the upgrade phase machine
//!
//! ```text
//! Planned -> Staged -> Activating -> Verifying -> Complete
//!              |           |            |
//!              +-----------+------------+--> Failed
//! ```
//!
//! Emergency upgrades enter the machine at `Activating`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::{ActivationPoint, ChainSnapshot};
use crate::chainspec::ChainspecDelta;
use crate::errors::{DevnetError, Result, UpgradeErrorKind};
use crate::ids::{NodeId, ProtocolVersion};

/// How nodes are cycled onto the new version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// Stop all, swap all, start all
    #[default]
    BigBang,
    /// One node at a time in roster order
    Rolling,
}

/// Phase of an upgrade run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    /// Plan accepted, nothing staged
    Planned,
    /// Binary and chainspec installed beside the running version
    Staged,
    /// Swapping nodes onto the new version
    Activating,
    /// Waiting for the fleet to converge on the new version
    Verifying,
    /// Upgrade confirmed
    Complete,
    /// Terminal failure, fleet left as-is for inspection
    Failed,
}

impl UpgradePhase {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: UpgradePhase) -> bool {
        use UpgradePhase::*;
        matches!(
            (self, next),
            (Planned, Staged)
                | (Staged, Activating)
                | (Activating, Verifying)
                | (Verifying, Complete)
                | (Staged, Failed)
                | (Activating, Failed)
                | (Verifying, Failed)
        )
    }

    /// Whether the run has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, UpgradePhase::Complete | UpgradePhase::Failed)
    }
}

impl fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpgradePhase::Planned => "planned",
            UpgradePhase::Staged => "staged",
            UpgradePhase::Activating => "activating",
            UpgradePhase::Verifying => "verifying",
            UpgradePhase::Complete => "complete",
            UpgradePhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A validated request to move the fleet to a new protocol version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradePlan {
    /// Version to install
    pub target_version: ProtocolVersion,
    /// Chainspec changes shipped with the version
    pub delta: ChainspecDelta,
    /// Where the version takes effect
    pub activation: ActivationPoint,
    /// Rollout strategy
    pub rollout: RolloutStrategy,
    /// How far before the activation point the swap starts, in the point's unit
    pub lead: u64,
    /// Skip the wait for the activation point
    pub emergency: bool,
    /// Observation the plan was validated against
    pub observed_at_creation: Option<ChainSnapshot>,
}

impl UpgradePlan {
    /// Validate and build a scheduled plan.
    ///
    /// The activation point must be strictly ahead of `observed`.
    pub fn scheduled(
        target_version: ProtocolVersion,
        activation: ActivationPoint,
        rollout: RolloutStrategy,
        lead: u64,
        observed: ChainSnapshot,
    ) -> Result<Self> {
        check_activation(&activation, &observed)?;
        Ok(Self {
            target_version,
            delta: ChainspecDelta {
                protocol_version: Some(target_version),
                activation_point: Some(activation),
                ..Default::default()
            },
            activation,
            rollout,
            lead,
            emergency: false,
            observed_at_creation: Some(observed),
        })
    }

    /// Build an emergency plan activating immediately at the observed point
    pub fn emergency(target_version: ProtocolVersion, observed: Option<ChainSnapshot>) -> Self {
        let era = observed.as_ref().map(|s| s.era).unwrap_or_default();
        Self {
            target_version,
            delta: ChainspecDelta {
                protocol_version: Some(target_version),
                activation_point: Some(ActivationPoint::EraId(era)),
                hard_reset: Some(true),
                last_emergency_restart: Some(era),
                ..Default::default()
            },
            activation: ActivationPoint::EraId(era),
            rollout: RolloutStrategy::BigBang,
            lead: 0,
            emergency: true,
            observed_at_creation: observed,
        }
    }

    /// Merge extra chainspec overrides, keeping version and activation point
    pub fn with_delta(mut self, extra: ChainspecDelta) -> Self {
        self.delta.validator_slots = extra.validator_slots.or(self.delta.validator_slots);
        self.delta.hard_reset = extra.hard_reset.or(self.delta.hard_reset);
        self.delta.last_emergency_restart = extra
            .last_emergency_restart
            .or(self.delta.last_emergency_restart);
        self
    }
}

/// Reject an activation point that is not strictly ahead of `observed`
pub fn check_activation(activation: &ActivationPoint, observed: &ChainSnapshot) -> Result<()> {
    if activation.is_ahead_of(observed) {
        return Ok(());
    }
    Err(DevnetError::upgrade(
        UpgradeErrorKind::StageValidation,
        vec![observed.node],
        format!(
            "{activation} is not ahead of observed height {} era {}",
            observed.height, observed.era
        ),
    ))
}

/// One recorded phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// Phase entered
    pub phase: UpgradePhase,
    /// When it was entered
    pub at: DateTime<Utc>,
    /// Optional note, e.g. the failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Persistent record of an upgrade run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRun {
    /// Run id
    pub id: String,
    /// The plan being executed
    pub plan: UpgradePlan,
    /// Current phase
    pub phase: UpgradePhase,
    /// Phase history, oldest first
    pub history: Vec<PhaseTransition>,
    /// Nodes already swapped onto the target version
    pub swapped: Vec<NodeId>,
    /// Nodes that failed during rollout or verification
    pub failed: Vec<NodeId>,
}

impl UpgradeRun {
    /// Start a run in `phase`
    pub fn new(id: impl Into<String>, plan: UpgradePlan, phase: UpgradePhase) -> Self {
        Self {
            id: id.into(),
            plan,
            phase,
            history: vec![PhaseTransition {
                phase,
                at: Utc::now(),
                note: None,
            }],
            swapped: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: UpgradePhase, note: Option<String>) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(DevnetError::upgrade(
                UpgradeErrorKind::StageValidation,
                Vec::new(),
                format!("illegal upgrade transition {} -> {next}", self.phase),
            ));
        }
        self.phase = next;
        self.history.push(PhaseTransition {
            phase: next,
            at: Utc::now(),
            note,
        });
        Ok(())
    }

    /// Whether the run ever entered `phase`
    pub fn visited(&self, phase: UpgradePhase) -> bool {
        self.history.iter().any(|t| t.phase == phase)
    }
}
