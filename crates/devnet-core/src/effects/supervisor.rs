//! Process supervision collaborator
//!
//! Abstracts the operating system's job control so the fleet controller can be
//! driven by real processes or by an in-memory supervisor in tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::ids::{NodeId, ProtocolVersion};
use crate::process::ProcessIdentity;

/// Everything needed to launch one node process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Node being launched
    pub node: NodeId,
    /// Version the node is configured to run
    pub version: ProtocolVersion,
    /// Executable
    pub program: PathBuf,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub working_dir: PathBuf,
    /// Where stdout is appended
    pub stdout_log: PathBuf,
    /// Where stderr is appended
    pub stderr_log: PathBuf,
}

/// Observed status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Still alive
    Running,
    /// Exited, with an exit code when one is known
    Exited(Option<i32>),
}

/// Failure from the supervisor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
    /// The process could not be created
    #[error("spawn failed: {0}")]
    Spawn(String),
    /// A signal could not be delivered
    #[error("signal failed: {0}")]
    Signal(String),
}

/// Start, signal and observe node processes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch a process
    async fn spawn(&self, spec: &LaunchSpec) -> Result<ProcessIdentity, SupervisorError>;

    /// Ask the process to exit gracefully
    async fn terminate(&self, process: ProcessIdentity) -> Result<(), SupervisorError>;

    /// Force the process to exit
    async fn kill(&self, process: ProcessIdentity) -> Result<(), SupervisorError>;

    /// Current status
    async fn status(&self, process: ProcessIdentity) -> ProcessStatus;

    /// Wait up to `timeout` for exit; true when the process has exited
    async fn wait_for_exit(&self, process: ProcessIdentity, timeout: Duration) -> bool;
}
