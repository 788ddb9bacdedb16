//! In-memory process supervisor
//!
//! Stands in for the operating system. Spawning a node marks it running on
//! the [`SimulatedChain`]; any exit marks it stopped. Failure modes are
//! scripted per node, and every lifecycle action lands in an event log tagged
//! with the chain height at that moment.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devnet_core::effects::{LaunchSpec, ProcessStatus, ProcessSupervisor, SupervisorError};
use devnet_core::{NodeId, ProcessIdentity, ProtocolVersion};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::chain::SimulatedChain;

/// What happened to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Launched on a version
    Spawned(ProtocolVersion),
    /// Exited after SIGTERM
    Terminated,
    /// SIGTERM was ignored
    TermIgnored,
    /// Exited after SIGKILL
    Killed,
    /// Exited on its own
    Crashed,
}

/// One entry in the supervisor's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorEvent {
    /// Node the process belongs to
    pub node: NodeId,
    /// Process id
    pub pid: u32,
    /// What happened
    pub kind: EventKind,
    /// When
    pub at: Instant,
    /// Chain height at that moment
    pub height: u64,
}

#[derive(Debug)]
struct MockProcess {
    node: NodeId,
    exit: Option<i32>,
}

#[derive(Debug, Default)]
struct Script {
    fail_spawn: BTreeSet<NodeId>,
    fail_spawn_on: BTreeSet<(NodeId, ProtocolVersion)>,
    crash_on_start: BTreeSet<(NodeId, ProtocolVersion)>,
    ignore_sigterm: BTreeSet<NodeId>,
}

#[derive(Debug, Default)]
struct SupervisorState {
    next_pid: u32,
    processes: BTreeMap<u32, MockProcess>,
    script: Script,
    events: Vec<SupervisorEvent>,
    launches: Vec<LaunchSpec>,
}

/// [`ProcessSupervisor`] driving a [`SimulatedChain`].
#[derive(Debug)]
pub struct MockSupervisor {
    chain: Arc<SimulatedChain>,
    state: Mutex<SupervisorState>,
}

impl MockSupervisor {
    /// Supervisor whose processes appear on `chain`
    pub fn new(chain: Arc<SimulatedChain>) -> Self {
        Self {
            chain,
            state: Mutex::new(SupervisorState {
                next_pid: 1_000,
                ..SupervisorState::default()
            }),
        }
    }

    /// Every spawn of `node` fails
    pub fn fail_spawn(&self, node: NodeId) {
        self.state.lock().script.fail_spawn.insert(node);
    }

    /// Spawning `node` on `version` fails
    pub fn fail_spawn_on(&self, node: NodeId, version: ProtocolVersion) {
        self.state.lock().script.fail_spawn_on.insert((node, version));
    }

    /// `node` exits immediately after being spawned on `version`
    pub fn crash_on_start(&self, node: NodeId, version: ProtocolVersion) {
        self.state.lock().script.crash_on_start.insert((node, version));
    }

    /// `node` ignores SIGTERM and only dies to SIGKILL
    pub fn ignore_sigterm(&self, node: NodeId) {
        self.state.lock().script.ignore_sigterm.insert(node);
    }

    /// Clear every scripted failure
    pub fn clear_script(&self) {
        self.state.lock().script = Script::default();
    }

    /// Kill `node`'s live process as if it crashed
    pub fn crash(&self, node: NodeId) {
        let pids: Vec<u32> = {
            let state = self.state.lock();
            state
                .processes
                .iter()
                .filter(|(_, p)| p.node == node && p.exit.is_none())
                .map(|(pid, _)| *pid)
                .collect()
        };
        for pid in pids {
            self.exit(pid, EventKind::Crashed, 1);
        }
    }

    /// Full event log, oldest first
    pub fn events(&self) -> Vec<SupervisorEvent> {
        self.state.lock().events.clone()
    }

    /// Events for `node`, oldest first
    pub fn events_for(&self, node: NodeId) -> Vec<SupervisorEvent> {
        self.events().into_iter().filter(|e| e.node == node).collect()
    }

    /// Launch specs received, oldest first
    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.state.lock().launches.clone()
    }

    /// Number of live processes for `node`
    pub fn live_processes(&self, node: NodeId) -> usize {
        self.state
            .lock()
            .processes
            .values()
            .filter(|p| p.node == node && p.exit.is_none())
            .count()
    }

    fn record(state: &mut SupervisorState, node: NodeId, pid: u32, kind: EventKind, height: u64) {
        state.events.push(SupervisorEvent {
            node,
            pid,
            kind,
            at: Instant::now(),
            height,
        });
    }

    fn exit(&self, pid: u32, kind: EventKind, code: i32) {
        let height = self.chain.height();
        let mut state = self.state.lock();
        let Some(process) = state.processes.get_mut(&pid) else {
            return;
        };
        if process.exit.is_some() {
            return;
        }
        process.exit = Some(code);
        let node = process.node;
        Self::record(&mut state, node, pid, kind, height);
        let still_running = state
            .processes
            .values()
            .any(|p| p.node == node && p.exit.is_none());
        drop(state);
        if !still_running {
            self.chain.node_stopped(node);
        }
        debug!(%node, pid, ?kind, "mock process exited");
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.state
            .lock()
            .processes
            .get(&pid)
            .is_some_and(|p| p.exit.is_none())
    }
}

#[async_trait]
impl ProcessSupervisor for MockSupervisor {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<ProcessIdentity, SupervisorError> {
        let height = self.chain.height();
        let (pid, crash) = {
            let mut state = self.state.lock();
            state.launches.push(spec.clone());
            if state.script.fail_spawn.contains(&spec.node)
                || state.script.fail_spawn_on.contains(&(spec.node, spec.version))
            {
                return Err(SupervisorError::Spawn(format!(
                    "{} refused to launch on {}",
                    spec.node, spec.version
                )));
            }
            let pid = state.next_pid;
            state.next_pid += 1;
            state.processes.insert(
                pid,
                MockProcess {
                    node: spec.node,
                    exit: None,
                },
            );
            Self::record(&mut state, spec.node, pid, EventKind::Spawned(spec.version), height);
            let crash = state.script.crash_on_start.contains(&(spec.node, spec.version));
            (pid, crash)
        };
        self.chain.node_started(spec.node, spec.version);
        if crash {
            self.exit(pid, EventKind::Crashed, 101);
        }
        Ok(ProcessIdentity { pid })
    }

    async fn terminate(&self, process: ProcessIdentity) -> Result<(), SupervisorError> {
        let ignored = {
            let state = self.state.lock();
            let Some(mock) = state.processes.get(&process.pid) else {
                return Err(SupervisorError::Signal(format!("no process {}", process.pid)));
            };
            state.script.ignore_sigterm.contains(&mock.node).then_some(mock.node)
        };
        match ignored {
            Some(node) => {
                let height = self.chain.height();
                Self::record(&mut self.state.lock(), node, process.pid, EventKind::TermIgnored, height);
            }
            None => self.exit(process.pid, EventKind::Terminated, 0),
        }
        Ok(())
    }

    async fn kill(&self, process: ProcessIdentity) -> Result<(), SupervisorError> {
        if !self.state.lock().processes.contains_key(&process.pid) {
            return Err(SupervisorError::Signal(format!("no process {}", process.pid)));
        }
        self.exit(process.pid, EventKind::Killed, -9);
        Ok(())
    }

    async fn status(&self, process: ProcessIdentity) -> ProcessStatus {
        match self.state.lock().processes.get(&process.pid) {
            Some(MockProcess { exit: None, .. }) => ProcessStatus::Running,
            Some(MockProcess { exit, .. }) => ProcessStatus::Exited(*exit),
            None => ProcessStatus::Exited(None),
        }
    }

    async fn wait_for_exit(&self, process: ProcessIdentity, timeout: Duration) -> bool {
        if !self.is_alive(process.pid) {
            return true;
        }
        tokio::time::sleep(timeout).await;
        !self.is_alive(process.pid)
    }
}
