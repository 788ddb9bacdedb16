//! Upgrade orchestrator
//!
//! Drives an [`UpgradeRun`] through `Planned -> Staged -> Activating ->
//! Verifying -> Complete`. Staging installs the new binary and chainspec
//! beside the running version without disturbing it. Activation waits for the
//! activation point (minus the lead), takes the phase lock, and swaps nodes
//! per the rollout strategy. Verification waits for every member to report
//! the target version at or past the activation point.
//!
//! Failures stop the run in `Failed` and leave the fleet as it is; nothing is
//! rolled back automatically. Each transition is persisted to
//! `upgrades/<ver>.json`.

use std::sync::Arc;
use std::time::Duration;

use devnet_core::effects::{BinaryProvenance, StagedArtifacts};
use devnet_core::upgrade::check_activation;
use devnet_core::{
    ActivationPoint, AwaitCondition, ChainSnapshot, ChainspecDelta, DevnetError, NodeId,
    Predicate, ProtocolVersion, Result, RolloutStrategy, UpgradeErrorKind, UpgradePhase,
    UpgradePlan, UpgradeRun,
};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assets::AssetManager;
use crate::await_engine::AwaitEngine;
use crate::fleet::FleetController;
use crate::monitor::ChainStateMonitor;
use crate::phase_lock::PhaseLock;
use crate::roster::RosterStore;
use crate::ticker::Cancellation;

/// Timing used by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeSettings {
    /// Poll interval for activation and verification waits
    pub poll_interval: Duration,
    /// How long to wait for the activation point
    pub activation_timeout: Duration,
    /// How long the fleet has to converge after the swap
    pub verification_timeout: Duration,
    /// Pause after a restart before confirming the process stayed up
    pub restart_settle: Duration,
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            activation_timeout: Duration::from_secs(3_600),
            verification_timeout: Duration::from_secs(300),
            restart_settle: Duration::from_millis(500),
        }
    }
}

/// Coordinates protocol upgrades across the fleet.
pub struct UpgradeOrchestrator {
    assets: Arc<AssetManager>,
    fleet: Arc<FleetController>,
    monitor: Arc<ChainStateMonitor>,
    engine: Arc<AwaitEngine>,
    roster: Arc<RosterStore>,
    provenance: Arc<dyn BinaryProvenance>,
    phase_lock: PhaseLock,
    settings: UpgradeSettings,
}

impl UpgradeOrchestrator {
    /// Assemble an orchestrator
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        assets: Arc<AssetManager>,
        fleet: Arc<FleetController>,
        monitor: Arc<ChainStateMonitor>,
        engine: Arc<AwaitEngine>,
        roster: Arc<RosterStore>,
        provenance: Arc<dyn BinaryProvenance>,
        phase_lock: PhaseLock,
        settings: UpgradeSettings,
    ) -> Self {
        Self {
            assets,
            fleet,
            monitor,
            engine,
            roster,
            provenance,
            phase_lock,
            settings,
        }
    }

    /// Validate a scheduled upgrade against the current chain state
    pub async fn plan(
        &self,
        target_version: ProtocolVersion,
        activation: ActivationPoint,
        rollout: RolloutStrategy,
        lead: u64,
    ) -> Result<UpgradePlan> {
        let observed = self.observe_fleet().await?;
        UpgradePlan::scheduled(target_version, activation, rollout, lead, observed)
    }

    /// Activation point at the start of the era after the one observed now
    pub async fn next_era_boundary(&self) -> Result<ActivationPoint> {
        let observed = self.observe_fleet().await?;
        Ok(ActivationPoint::EraId(observed.era + 1))
    }

    /// Open a run for `plan` in `Planned`
    pub fn begin(&self, plan: UpgradePlan) -> UpgradeRun {
        UpgradeRun::new(Uuid::new_v4().to_string(), plan, UpgradePhase::Planned)
    }

    /// Install binary and chainspec for the target version on every member.
    ///
    /// Running processes are untouched. A validation failure leaves the run in
    /// `Planned`.
    pub async fn stage(&self, run: &mut UpgradeRun) -> Result<()> {
        expect_phase(run, UpgradePhase::Planned)?;
        if !run.plan.emergency {
            let observed = self.observe_fleet().await?;
            check_activation(&run.plan.activation, &observed)?;
        }
        let artifacts = self.fetch(&run.plan.target_version).await?;
        self.install(&run.plan, &artifacts)?;
        run.transition(UpgradePhase::Staged, None)?;
        self.persist(run);
        info!(run = %run.id, version = %run.plan.target_version, "upgrade staged");
        Ok(())
    }

    /// Wait for the activation point, then swap the fleet onto the target
    /// version. Ends in `Verifying` on success.
    pub async fn activate(&self, run: &mut UpgradeRun, cancel: Option<&Cancellation>) -> Result<()> {
        expect_phase(run, UpgradePhase::Staged)?;

        let trigger = run.plan.activation.minus(run.plan.lead);
        let predicate = match trigger {
            ActivationPoint::Height(height) => Predicate::HeightAtLeast(height),
            ActivationPoint::EraId(era) => Predicate::EraAtLeast(era),
        };
        let condition = AwaitCondition::new(predicate)
            .with_poll_interval(self.settings.poll_interval)
            .with_timeout(self.settings.activation_timeout);
        info!(run = %run.id, %trigger, "waiting for activation trigger");
        if let Err(e) = self.engine.wait_with_cancel(&condition, cancel).await {
            return Err(self.fail(run, e));
        }

        let guard = match self.phase_lock.try_acquire(&run.id) {
            Ok(guard) => guard,
            Err(e) => return Err(self.fail(run, e)),
        };
        run.transition(UpgradePhase::Activating, None)?;
        self.persist(run);

        let swapped = self.swap(run).await;
        drop(guard);
        if let Err(e) = swapped {
            return Err(self.fail(run, e));
        }

        run.transition(UpgradePhase::Verifying, None)?;
        self.persist(run);
        Ok(())
    }

    /// Wait until every member reports the target version at or past the
    /// activation point. Ends in `Complete` on success.
    pub async fn verify(&self, run: &mut UpgradeRun, cancel: Option<&Cancellation>) -> Result<()> {
        expect_phase(run, UpgradePhase::Verifying)?;
        let version = run.plan.target_version;
        let activation = run.plan.activation;
        let deadline = Instant::now() + self.settings.verification_timeout;

        let mut lagging = Vec::new();
        for node in self.roster.members() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let condition = AwaitCondition::new(Predicate::custom(
                format!("{version} at or past {activation}"),
                move |latest, _| {
                    latest.protocol_version == version && activation.is_reached_by(latest, 0)
                },
            ))
            .pinned_to(node)
            .with_poll_interval(self.settings.poll_interval)
            .with_timeout(remaining);

            match self.engine.wait_with_cancel(&condition, cancel).await {
                Ok(_) => {}
                Err(e @ DevnetError::Cancelled { .. }) => return Err(self.fail(run, e)),
                Err(e) => {
                    warn!(%node, error = %e, "node did not converge");
                    lagging.push(node);
                }
            }
        }

        if !lagging.is_empty() {
            run.failed = lagging.clone();
            let err = DevnetError::upgrade(
                UpgradeErrorKind::VerificationTimeout,
                lagging.clone(),
                format!("{} did not reach {version} in time", describe(&lagging)),
            );
            return Err(self.fail(run, err));
        }

        let chainspec = self.staged_chainspec(run)?;
        self.assets.promote_chainspec(chainspec)?;
        run.transition(UpgradePhase::Complete, None)?;
        self.persist(run);
        info!(run = %run.id, %version, "upgrade complete");
        Ok(())
    }

    /// Plan, stage, activate and verify in one call
    pub async fn run(&self, plan: UpgradePlan, cancel: Option<&Cancellation>) -> Result<UpgradeRun> {
        let mut run = self.begin(plan);
        self.stage(&mut run).await?;
        self.activate(&mut run, cancel).await?;
        self.verify(&mut run, cancel).await?;
        Ok(run)
    }

    /// Recovery upgrade for a stalled or crashed fleet.
    ///
    /// Skips the activation wait, marks the chainspec as a hard reset from the
    /// current era and swaps every member at once.
    pub async fn emergency(
        &self,
        target_version: ProtocolVersion,
        extra: ChainspecDelta,
        cancel: Option<&Cancellation>,
    ) -> Result<UpgradeRun> {
        let id = Uuid::new_v4().to_string();
        let guard = self.phase_lock.try_acquire(&id)?;
        let observed = match self.observe_fleet().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "no member reachable, restarting from era 0");
                None
            }
        };
        let plan = UpgradePlan::emergency(target_version, observed).with_delta(extra);
        let artifacts = self.fetch(&target_version).await?;
        self.install(&plan, &artifacts)?;

        let mut run = UpgradeRun::new(id, plan, UpgradePhase::Activating);
        self.persist(&run);
        warn!(run = %run.id, version = %target_version, activation = %run.plan.activation, "emergency upgrade");

        let swapped = self.swap(&mut run).await;
        drop(guard);
        if let Err(e) = swapped {
            return Err(self.fail(&mut run, e));
        }
        run.transition(UpgradePhase::Verifying, None)?;
        self.persist(&run);
        self.verify(&mut run, cancel).await?;
        Ok(run)
    }

    /// Persisted record for `version`, if any
    pub fn record(&self, version: &ProtocolVersion) -> Result<Option<UpgradeRun>> {
        self.assets.upgrade_record(version)
    }

    /// One observation from the first reachable member
    pub async fn observe_fleet(&self) -> Result<ChainSnapshot> {
        let members = self.roster.members();
        let mut last_error = None;
        for node in &members {
            match self.monitor.snapshot(*node).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| DevnetError::configuration("the roster is empty")))
    }

    async fn fetch(&self, version: &ProtocolVersion) -> Result<StagedArtifacts> {
        self.provenance.fetch(version).await.map_err(|e| {
            DevnetError::upgrade(UpgradeErrorKind::StageValidation, Vec::new(), e.to_string())
        })
    }

    fn install(&self, plan: &UpgradePlan, artifacts: &StagedArtifacts) -> Result<()> {
        for node in self.roster.members() {
            self.assets.install_binary(node, artifacts)?;
        }
        let base = artifacts
            .chainspec
            .clone()
            .unwrap_or_else(|| self.assets.chainspec());
        self.assets
            .regenerate_chainspec_from(&base, plan.target_version, &plan.delta)?;
        Ok(())
    }

    fn staged_chainspec(&self, run: &UpgradeRun) -> Result<devnet_core::Chainspec> {
        let node = self
            .roster
            .members()
            .first()
            .copied()
            .ok_or_else(|| DevnetError::configuration("the roster is empty"))?;
        let descriptor = self.assets.node(node)?;
        crate::assets::read_toml(
            &descriptor
                .config_dir(&run.plan.target_version)
                .join("chainspec.toml"),
        )
    }

    async fn swap(&self, run: &mut UpgradeRun) -> Result<()> {
        let version = run.plan.target_version;
        let unstaged: Vec<NodeId> = self
            .roster
            .members()
            .into_iter()
            .filter(|node| !self.assets.is_staged(*node, &version))
            .collect();
        if !unstaged.is_empty() {
            run.failed = unstaged.clone();
            return Err(DevnetError::upgrade(
                UpgradeErrorKind::StageValidation,
                unstaged.clone(),
                format!("{version} is not staged on {}; nothing was stopped", describe(&unstaged)),
            ));
        }
        match run.plan.rollout {
            RolloutStrategy::BigBang => self.swap_big_bang(run).await,
            RolloutStrategy::Rolling => self.swap_rolling(run).await,
        }
    }

    /// Stop every member, point all at the new version, start every member
    async fn swap_big_bang(&self, run: &mut UpgradeRun) -> Result<()> {
        let version = run.plan.target_version;
        let members = self.roster.members();

        let mut failed = Vec::new();
        for (node, result) in self.fleet.stop_all(&members).await {
            match result {
                Ok(()) => {}
                Err(e) if e.is_ungraceful_stop() => warn!(%node, "forced stop during upgrade"),
                Err(e) => {
                    warn!(%node, error = %e, "could not stop node");
                    failed.push(node);
                }
            }
        }
        if !failed.is_empty() {
            run.failed = failed.clone();
            return Err(DevnetError::upgrade(
                UpgradeErrorKind::PartialRolloutFailure,
                failed.clone(),
                format!("{} could not be stopped; nothing was swapped", describe(&failed)),
            ));
        }

        let mut ready = Vec::with_capacity(members.len());
        for node in &members {
            match self.assets.activate_version(*node, version) {
                Ok(()) => {
                    run.swapped.push(*node);
                    ready.push(*node);
                }
                Err(e) => {
                    warn!(%node, error = %e, "could not switch node to {version}");
                    failed.push(*node);
                }
            }
        }

        for (node, result) in self.fleet.start_all(&ready).await {
            if let Err(e) = result {
                warn!(%node, error = %e, "node failed to start on {version}");
                failed.push(node);
            }
        }
        tokio::time::sleep(self.settings.restart_settle).await;
        for node in &members {
            if !failed.contains(node) && self.fleet.crash_check(*node).await? {
                failed.push(*node);
            }
        }

        if failed.is_empty() {
            info!(%version, nodes = members.len(), "all nodes restarted");
            return Ok(());
        }
        failed.sort();
        run.failed = failed.clone();
        Err(DevnetError::upgrade(
            UpgradeErrorKind::PartialRolloutFailure,
            failed.clone(),
            format!("{} failed to come back on {version}", describe(&failed)),
        ))
    }

    /// Cycle members one at a time in roster order, halting at the first
    /// node that fails to come back
    async fn swap_rolling(&self, run: &mut UpgradeRun) -> Result<()> {
        let version = run.plan.target_version;
        let members = self.roster.members();
        for (position, node) in members.iter().enumerate() {
            if let Err(e) = self.cycle_node(*node, version).await {
                run.failed.push(*node);
                let untouched = members.len() - position - 1;
                return Err(DevnetError::upgrade(
                    UpgradeErrorKind::PartialRolloutFailure,
                    vec![*node],
                    format!("{node} failed on {version}: {e}; {untouched} nodes left untouched"),
                ));
            }
            run.swapped.push(*node);
            self.persist(run);
            info!(%node, %version, done = position + 1, of = members.len(), "node swapped");
        }
        Ok(())
    }

    async fn cycle_node(&self, node: NodeId, version: ProtocolVersion) -> Result<()> {
        match self.fleet.stop(node).await {
            Ok(()) => {}
            Err(e) if e.is_ungraceful_stop() => warn!(%node, "forced stop during upgrade"),
            Err(e) => return Err(e),
        }
        self.assets.activate_version(node, version)?;
        self.fleet.start(node).await?;
        tokio::time::sleep(self.settings.restart_settle).await;
        if self.fleet.crash_check(node).await? {
            return Err(DevnetError::process(
                node,
                devnet_core::ProcessErrorKind::SpawnFailed,
                "exited right after start",
            ));
        }
        Ok(())
    }

    fn fail(&self, run: &mut UpgradeRun, err: DevnetError) -> DevnetError {
        if run.phase.can_transition_to(UpgradePhase::Failed) {
            if let Err(e) = run.transition(UpgradePhase::Failed, Some(err.to_string())) {
                warn!(error = %e, "could not record failure");
            }
            self.persist(run);
        }
        warn!(run = %run.id, phase = %run.phase, error = %err, "upgrade failed");
        err
    }

    fn persist(&self, run: &UpgradeRun) {
        if let Err(e) = self.assets.record_upgrade(run) {
            warn!(run = %run.id, error = %e, "failed to persist upgrade record");
        }
    }
}

fn expect_phase(run: &UpgradeRun, phase: UpgradePhase) -> Result<()> {
    if run.phase == phase {
        return Ok(());
    }
    Err(DevnetError::upgrade(
        UpgradeErrorKind::StageValidation,
        Vec::new(),
        format!("run {} is {}, expected {phase}", run.id, run.phase),
    ))
}

fn describe(nodes: &[NodeId]) -> String {
    nodes
        .iter()
        .map(NodeId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
