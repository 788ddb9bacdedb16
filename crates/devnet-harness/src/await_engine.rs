//! Await engine
//!
//! Blocks the caller until a chain condition holds, a deadline passes, or the
//! operator cancels. Delta predicates measure from a baseline captured on the
//! first successful poll. An unreachable source counts as an unsatisfied
//! observation, never as an error.

use std::collections::HashMap;
use std::sync::Arc;

use devnet_core::{AwaitCondition, ChainSnapshot, DevnetError, NodeId, Result, SourcePolicy};
use tracing::{debug, info, warn};

use crate::monitor::ChainStateMonitor;
use crate::roster::RosterStore;
use crate::ticker::{Cancellation, PollTicker, Tick};

/// Polls the chain until an [`AwaitCondition`] is satisfied.
pub struct AwaitEngine {
    monitor: Arc<ChainStateMonitor>,
    roster: Arc<RosterStore>,
}

impl AwaitEngine {
    /// Engine polling through `monitor`, falling back across `roster`
    pub fn new(monitor: Arc<ChainStateMonitor>, roster: Arc<RosterStore>) -> Self {
        Self { monitor, roster }
    }

    /// Wait for `condition`; returns the first satisfying snapshot
    pub async fn wait(&self, condition: &AwaitCondition) -> Result<ChainSnapshot> {
        self.wait_with_cancel(condition, None).await
    }

    /// Wait for `condition`, abandoning the wait when `cancel` fires.
    ///
    /// Timeouts and cancellations carry the last snapshot observed.
    pub async fn wait_with_cancel(
        &self,
        condition: &AwaitCondition,
        cancel: Option<&Cancellation>,
    ) -> Result<ChainSnapshot> {
        let mut ticker = PollTicker::new(condition.poll_interval, condition.timeout);
        if let Some(cancel) = cancel {
            ticker = ticker.with_cancellation(cancel.clone());
        }
        let mut baseline: Option<ChainSnapshot> = None;
        let mut last: Option<ChainSnapshot> = None;
        let mut highest: HashMap<NodeId, u64> = HashMap::new();

        info!(%condition, timeout = ?condition.timeout, "waiting");
        loop {
            match ticker.tick().await {
                Tick::Ready => {}
                Tick::Expired => {
                    warn!(%condition, last_height = ?last.as_ref().map(|s| s.height), "wait timed out");
                    return Err(DevnetError::timeout(condition.to_string(), last));
                }
                Tick::Cancelled => {
                    info!(%condition, "wait cancelled");
                    return Err(DevnetError::cancelled(condition.to_string(), last));
                }
            }

            let Some(snapshot) = self.observe(condition.source).await else {
                continue;
            };

            let seen = highest.entry(snapshot.node).or_insert(snapshot.height);
            if snapshot.height < *seen {
                warn!(
                    node = %snapshot.node,
                    height = snapshot.height,
                    previous = *seen,
                    "observed height went backwards"
                );
            } else {
                *seen = snapshot.height;
            }

            let base = baseline.get_or_insert_with(|| snapshot.clone());
            if condition.predicate.is_satisfied(&snapshot, base) {
                info!(%condition, node = %snapshot.node, height = snapshot.height, era = snapshot.era, "condition met");
                return Ok(snapshot);
            }
            debug!(node = %snapshot.node, height = snapshot.height, era = snapshot.era, "condition not yet met");
            last = Some(snapshot);
        }
    }

    /// One observation per the source policy; `None` when nothing answered
    async fn observe(&self, source: SourcePolicy) -> Option<ChainSnapshot> {
        match source {
            SourcePolicy::Pinned(node) => match self.monitor.snapshot(node).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    debug!(%node, error = %e, "pinned source unreachable");
                    None
                }
            },
            SourcePolicy::AnyReachable => {
                for node in self.roster.members() {
                    match self.monitor.snapshot(node).await {
                        Ok(snapshot) => return Some(snapshot),
                        Err(e) => debug!(%node, error = %e, "source unreachable, trying next"),
                    }
                }
                None
            }
        }
    }
}
