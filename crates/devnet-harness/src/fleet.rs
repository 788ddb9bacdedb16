//! Process fleet controller
//!
//! Owns the lifecycle state of every registered node. Operations on one node
//! are serialized by that node's slot lock; different nodes proceed in
//! parallel.
//!
//! ```text
//! Stopped --start--> Starting --spawned--> Running --stop--> Stopping --> Stopped
//!                        |                    |
//!                        +--spawn error--> Stopped
//!                                             +--unrequested exit--> Crashed
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use devnet_core::effects::{LaunchSpec, ProcessStatus, ProcessSupervisor};
use devnet_core::{
    DevnetError, NodeDescriptor, NodeId, NodeLifecycle, NodeProcess, ProcessErrorKind,
    ProcessIdentity, Result,
};
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::assets::{binary_path, AssetManager};

/// Time allowed for a SIGKILLed process to disappear
const KILL_WAIT: Duration = Duration::from_secs(5);
const PID_FILE: &str = "node.pid";

type Slot = Arc<Mutex<NodeProcess>>;

/// Starts, stops and observes node processes.
pub struct FleetController {
    assets: Arc<AssetManager>,
    supervisor: Arc<dyn ProcessSupervisor>,
    launcher: Option<PathBuf>,
    stop_grace: Duration,
    slots: RwLock<BTreeMap<NodeId, Slot>>,
}

impl FleetController {
    /// Controller with no registered nodes
    pub fn new(
        assets: Arc<AssetManager>,
        supervisor: Arc<dyn ProcessSupervisor>,
        launcher: Option<PathBuf>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            assets,
            supervisor,
            launcher,
            stop_grace,
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Track `node` as Stopped; no-op when already registered
    pub fn register(&self, node: NodeId) {
        self.slots
            .write()
            .entry(node)
            .or_insert_with(|| Arc::new(Mutex::new(NodeProcess::stopped(node))));
    }

    /// Stop tracking `node`; it must not be running
    pub async fn deregister(&self, node: NodeId) -> Result<()> {
        let slot = self.slot(node)?;
        let process = slot.lock().await;
        if matches!(
            process.state,
            NodeLifecycle::Running | NodeLifecycle::Starting | NodeLifecycle::Stopping
        ) {
            return Err(DevnetError::process(
                node,
                ProcessErrorKind::SignalFailed,
                format!("cannot deregister while {}", process.state),
            ));
        }
        self.slots.write().remove(&node);
        debug!(%node, "deregistered from fleet");
        Ok(())
    }

    /// Registered node ids in ascending order
    pub fn registered(&self) -> Vec<NodeId> {
        self.slots.read().keys().copied().collect()
    }

    /// Re-attach to processes recorded in pid files by an earlier invocation.
    ///
    /// A recorded process that is gone is reported as Crashed, since nothing
    /// asked it to stop.
    pub async fn adopt(&self) -> Result<()> {
        for node in self.registered() {
            let descriptor = self.assets.node(node)?;
            let Some(identity) = read_pid_file(&descriptor) else {
                continue;
            };
            let slot = self.slot(node)?;
            let mut process = slot.lock().await;
            match self.supervisor.status(identity).await {
                ProcessStatus::Running => {
                    process.state = NodeLifecycle::Running;
                    process.identity = Some(identity);
                    process.last_seen = Some(Utc::now());
                    debug!(%node, pid = identity.pid, "adopted running process");
                }
                ProcessStatus::Exited(_) => {
                    process.state = NodeLifecycle::Crashed;
                    process.identity = Some(identity);
                    warn!(%node, pid = identity.pid, "recorded process is gone");
                }
            }
        }
        Ok(())
    }

    /// Start `node` with its currently configured version.
    ///
    /// Idempotent: a node that is already running keeps its process.
    pub async fn start(&self, node: NodeId) -> Result<ProcessIdentity> {
        let slot = self.slot(node)?;
        let mut process = slot.lock().await;

        if let (NodeLifecycle::Running, Some(identity)) = (process.state, process.identity) {
            match self.supervisor.status(identity).await {
                ProcessStatus::Running => {
                    process.last_seen = Some(Utc::now());
                    debug!(%node, pid = identity.pid, "already running");
                    return Ok(identity);
                }
                ProcessStatus::Exited(code) => {
                    warn!(%node, pid = identity.pid, ?code, "process died unobserved, restarting");
                }
            }
        }

        let descriptor = self.assets.node(node)?;
        let spec = self.launch_spec(&descriptor)?;
        process.state = NodeLifecycle::Starting;
        process.identity = None;

        match self.supervisor.spawn(&spec).await {
            Ok(identity) => {
                if let Err(e) = write_pid_file(&descriptor, identity) {
                    warn!(%node, error = %e, "failed to write pid file");
                }
                process.state = NodeLifecycle::Running;
                process.identity = Some(identity);
                process.last_seen = Some(Utc::now());
                info!(%node, pid = identity.pid, version = %descriptor.version, "node started");
                Ok(identity)
            }
            Err(e) => {
                process.state = NodeLifecycle::Stopped;
                warn!(%node, error = %e, "node failed to start");
                Err(DevnetError::process(
                    node,
                    ProcessErrorKind::SpawnFailed,
                    e.to_string(),
                ))
            }
        }
    }

    /// Stop `node` with the default grace period
    pub async fn stop(&self, node: NodeId) -> Result<()> {
        self.stop_with_grace(node, self.stop_grace).await
    }

    /// Stop `node`, escalating to SIGKILL once `grace` expires.
    ///
    /// An escalated stop still leaves the node Stopped but is reported as an
    /// `ungraceful-stop` process error.
    pub async fn stop_with_grace(&self, node: NodeId, grace: Duration) -> Result<()> {
        let slot = self.slot(node)?;
        let mut process = slot.lock().await;
        let descriptor = self.assets.node(node)?;

        let identity = match (process.state, process.identity) {
            (NodeLifecycle::Stopped, _) => return Ok(()),
            (NodeLifecycle::Crashed, _) | (_, None) => {
                process.state = NodeLifecycle::Stopped;
                process.identity = None;
                remove_pid_file(&descriptor);
                return Ok(());
            }
            (_, Some(identity)) => identity,
        };

        process.state = NodeLifecycle::Stopping;
        if let Err(e) = self.supervisor.terminate(identity).await {
            warn!(%node, error = %e, "SIGTERM not delivered");
        }
        let graceful = self.supervisor.wait_for_exit(identity, grace).await;
        if !graceful {
            warn!(%node, pid = identity.pid, ?grace, "grace period expired, sending SIGKILL");
            if let Err(e) = self.supervisor.kill(identity).await {
                process.state = NodeLifecycle::Running;
                return Err(DevnetError::process(
                    node,
                    ProcessErrorKind::SignalFailed,
                    e.to_string(),
                ));
            }
            if !self.supervisor.wait_for_exit(identity, KILL_WAIT).await {
                process.state = NodeLifecycle::Running;
                return Err(DevnetError::process(
                    node,
                    ProcessErrorKind::SignalFailed,
                    format!("pid {} survived SIGKILL", identity.pid),
                ));
            }
        }

        process.state = NodeLifecycle::Stopped;
        process.identity = None;
        remove_pid_file(&descriptor);

        if graceful {
            info!(%node, "node stopped");
            Ok(())
        } else {
            Err(DevnetError::process(
                node,
                ProcessErrorKind::UngracefulStop,
                format!("killed after {grace:?} grace period"),
            ))
        }
    }

    /// Stop then start `node`; an ungraceful stop does not prevent the start
    pub async fn restart(&self, node: NodeId) -> Result<ProcessIdentity> {
        match self.stop(node).await {
            Ok(()) => {}
            Err(e) if e.is_ungraceful_stop() => warn!(%node, "restart after forced stop"),
            Err(e) => return Err(e),
        }
        self.start(node).await
    }

    /// Detect an unrequested exit. Returns true when the node is Crashed.
    ///
    /// Crashed nodes are reported, never restarted automatically.
    pub async fn crash_check(&self, node: NodeId) -> Result<bool> {
        let slot = self.slot(node)?;
        let mut process = slot.lock().await;
        match (process.state, process.identity) {
            (NodeLifecycle::Crashed, _) => Ok(true),
            (NodeLifecycle::Running, Some(identity)) => {
                match self.supervisor.status(identity).await {
                    ProcessStatus::Running => {
                        process.last_seen = Some(Utc::now());
                        Ok(false)
                    }
                    ProcessStatus::Exited(code) => {
                        process.state = NodeLifecycle::Crashed;
                        warn!(%node, pid = identity.pid, ?code, "node exited without a stop request");
                        Ok(true)
                    }
                }
            }
            _ => Ok(false),
        }
    }

    /// Crash-check every registered node; returns the crashed ones
    pub async fn crash_check_all(&self) -> Result<Vec<NodeId>> {
        let mut crashed = Vec::new();
        for node in self.registered() {
            if self.crash_check(node).await? {
                crashed.push(node);
            }
        }
        Ok(crashed)
    }

    /// Start `nodes` concurrently
    pub async fn start_all(&self, nodes: &[NodeId]) -> Vec<(NodeId, Result<ProcessIdentity>)> {
        let results = join_all(nodes.iter().map(|node| self.start(*node))).await;
        nodes.iter().copied().zip(results).collect()
    }

    /// Stop `nodes` concurrently with the default grace period
    pub async fn stop_all(&self, nodes: &[NodeId]) -> Vec<(NodeId, Result<()>)> {
        let results = join_all(nodes.iter().map(|node| self.stop(*node))).await;
        nodes.iter().copied().zip(results).collect()
    }

    /// Lifecycle state of `node`
    pub async fn state(&self, node: NodeId) -> Result<NodeLifecycle> {
        Ok(self.slot(node)?.lock().await.state)
    }

    /// Record for `node`
    pub async fn process(&self, node: NodeId) -> Result<NodeProcess> {
        Ok(self.slot(node)?.lock().await.clone())
    }

    /// Records for all registered nodes
    pub async fn status(&self) -> Vec<NodeProcess> {
        let slots: Vec<Slot> = self.slots.read().values().cloned().collect();
        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            records.push(slot.lock().await.clone());
        }
        records
    }

    fn slot(&self, node: NodeId) -> Result<Slot> {
        self.slots.read().get(&node).cloned().ok_or_else(|| {
            DevnetError::process(
                node,
                ProcessErrorKind::UnknownNode,
                "node is not registered with the fleet",
            )
        })
    }

    fn launch_spec(&self, descriptor: &NodeDescriptor) -> Result<LaunchSpec> {
        let version = descriptor.version;
        let config = descriptor.config_path();
        if !config.is_file() {
            return Err(DevnetError::configuration(format!(
                "{} has no config for {version}",
                descriptor.id
            )));
        }

        let (program, args) = match &self.launcher {
            Some(launcher) => (
                launcher.clone(),
                vec![
                    "--node-dir".to_string(),
                    descriptor.data_dir.display().to_string(),
                    "--version".to_string(),
                    version.to_string(),
                ],
            ),
            None => (
                binary_path(descriptor, &version),
                vec!["validator".to_string(), config.display().to_string()],
            ),
        };

        let env = BTreeMap::from([
            ("DEVNET_NODE_ID".to_string(), descriptor.id.to_string()),
            ("DEVNET_NODE_VERSION".to_string(), version.to_string()),
            ("DEVNET_NODE_DIR".to_string(), descriptor.data_dir.display().to_string()),
        ]);

        Ok(LaunchSpec {
            node: descriptor.id,
            version,
            program,
            args,
            env,
            working_dir: descriptor.data_dir.clone(),
            stdout_log: descriptor.logs_dir().join("stdout.log"),
            stderr_log: descriptor.logs_dir().join("stderr.log"),
        })
    }
}

fn pid_path(descriptor: &NodeDescriptor) -> PathBuf {
    descriptor.run_dir().join(PID_FILE)
}

fn read_pid_file(descriptor: &NodeDescriptor) -> Option<ProcessIdentity> {
    let contents = std::fs::read_to_string(pid_path(descriptor)).ok()?;
    let pid = contents.trim().parse().ok()?;
    Some(ProcessIdentity { pid })
}

fn write_pid_file(descriptor: &NodeDescriptor, identity: ProcessIdentity) -> Result<()> {
    std::fs::create_dir_all(descriptor.run_dir())?;
    crate::assets::write_atomic(&pid_path(descriptor), identity.pid.to_string().as_bytes())
}

fn remove_pid_file(descriptor: &NodeDescriptor) {
    match std::fs::remove_file(pid_path(descriptor)) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(node = %descriptor.id, error = %e, "failed to remove pid file"),
    }
}
