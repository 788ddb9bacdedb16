//! Await conditions evaluated against chain snapshots

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::ChainSnapshot;
use crate::ids::NodeId;

/// Check used by [`Predicate::Custom`]; receives the latest snapshot and the
/// baseline captured when the wait began.
pub type SnapshotCheck = Arc<dyn Fn(&ChainSnapshot, &ChainSnapshot) -> bool + Send + Sync>;

/// What a wait is waiting for.
#[derive(Clone)]
pub enum Predicate {
    /// Height at or above a target
    HeightAtLeast(u64),
    /// Height at least `delta` above the baseline
    HeightAdvancedBy(u64),
    /// Era at or above a target
    EraAtLeast(u64),
    /// Era at least `delta` above the baseline
    EraAdvancedBy(u64),
    /// Arbitrary labelled check
    Custom {
        /// Shown in logs and timeout errors
        label: String,
        /// The check itself
        check: SnapshotCheck,
    },
}

impl Predicate {
    /// Build a custom predicate
    pub fn custom<F>(label: impl Into<String>, check: F) -> Self
    where
        F: Fn(&ChainSnapshot, &ChainSnapshot) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom {
            label: label.into(),
            check: Arc::new(check),
        }
    }

    /// Whether the predicate compares against a baseline
    pub fn needs_baseline(&self) -> bool {
        matches!(
            self,
            Predicate::HeightAdvancedBy(_) | Predicate::EraAdvancedBy(_) | Predicate::Custom { .. }
        )
    }

    /// Evaluate against the latest snapshot
    pub fn is_satisfied(&self, latest: &ChainSnapshot, baseline: &ChainSnapshot) -> bool {
        match self {
            Predicate::HeightAtLeast(target) => latest.height >= *target,
            Predicate::HeightAdvancedBy(delta) => {
                latest.height >= baseline.height.saturating_add(*delta)
            }
            Predicate::EraAtLeast(target) => latest.era >= *target,
            Predicate::EraAdvancedBy(delta) => latest.era >= baseline.era.saturating_add(*delta),
            Predicate::Custom { check, .. } => check(latest, baseline),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::HeightAtLeast(target) => write!(f, "height >= {target}"),
            Predicate::HeightAdvancedBy(delta) => write!(f, "height advanced by {delta}"),
            Predicate::EraAtLeast(target) => write!(f, "era >= {target}"),
            Predicate::EraAdvancedBy(delta) => write!(f, "era advanced by {delta}"),
            Predicate::Custom { label, .. } => f.write_str(label),
        }
    }
}

/// Which node(s) a wait polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePolicy {
    /// Only this node; unreachable polls count as unsatisfied observations
    Pinned(NodeId),
    /// First reachable node in roster order, chosen afresh on every poll
    AnyReachable,
}

/// A complete wait request.
#[derive(Debug, Clone)]
pub struct AwaitCondition {
    /// What to wait for
    pub predicate: Predicate,
    /// Delay between polls
    pub poll_interval: Duration,
    /// Deadline measured from the start of the wait
    pub timeout: Duration,
    /// Source selection
    pub source: SourcePolicy,
}

impl AwaitCondition {
    /// Default poll interval
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Default timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    /// Condition with default pacing, polling any reachable node
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
            source: SourcePolicy::AnyReachable,
        }
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pin the wait to one node
    pub fn pinned_to(mut self, node: NodeId) -> Self {
        self.source = SourcePolicy::Pinned(node);
        self
    }

    /// Set the source policy
    pub fn with_source(mut self, source: SourcePolicy) -> Self {
        self.source = source;
        self
    }
}

impl fmt::Display for AwaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            SourcePolicy::Pinned(node) => write!(f, "{} on {node}", self.predicate),
            SourcePolicy::AnyReachable => write!(f, "{} on any reachable node", self.predicate),
        }
    }
}
