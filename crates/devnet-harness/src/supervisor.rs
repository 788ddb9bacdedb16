//! Operating-system process supervisor
//!
//! Spawns each node in its own process group with output appended to its log
//! files, and signals the whole group so wrapper launchers take their children
//! down with them. Processes adopted from pid files are tracked by pid only.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use devnet_core::effects::{LaunchSpec, ProcessStatus, ProcessSupervisor, SupervisorError};
use devnet_core::ProcessIdentity;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

const EXIT_POLL: Duration = Duration::from_millis(100);

/// Supervisor backed by `tokio::process`.
#[derive(Default)]
pub struct OsSupervisor {
    children: Mutex<HashMap<u32, Child>>,
}

impl OsSupervisor {
    /// Supervisor with no tracked children
    pub fn new() -> Self {
        Self::default()
    }

    fn signal(&self, process: ProcessIdentity, signal: Signal) -> Result<(), SupervisorError> {
        let raw = i32::try_from(process.pid)
            .map_err(|_| SupervisorError::Signal(format!("pid {} out of range", process.pid)))?;
        match killpg(Pid::from_raw(raw), signal) {
            Ok(()) => Ok(()),
            // Not a group leader, e.g. adopted from an older layout
            Err(Errno::ESRCH) => match kill(Pid::from_raw(raw), signal) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(SupervisorError::Signal(format!("{signal:?} to {raw}: {e}"))),
            },
            Err(e) => Err(SupervisorError::Signal(format!("{signal:?} to group {raw}: {e}"))),
        }
    }
}

#[async_trait]
impl ProcessSupervisor for OsSupervisor {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<ProcessIdentity, SupervisorError> {
        let open_log = |path: &std::path::Path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| SupervisorError::Spawn(format!("open {}: {e}", path.display())))
        };
        let stdout = open_log(&spec.stdout_log)?;
        let stderr = open_log(&spec.stderr_log)?;

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(&spec.env)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{}: {e}", spec.program.display())))?;
        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::Spawn("process exited before reporting a pid".into()))?;

        debug!(node = %spec.node, pid, program = %spec.program.display(), "spawned node process");
        self.children.lock().insert(pid, child);
        Ok(ProcessIdentity { pid })
    }

    async fn terminate(&self, process: ProcessIdentity) -> Result<(), SupervisorError> {
        self.signal(process, Signal::SIGTERM)
    }

    async fn kill(&self, process: ProcessIdentity) -> Result<(), SupervisorError> {
        self.signal(process, Signal::SIGKILL)
    }

    async fn status(&self, process: ProcessIdentity) -> ProcessStatus {
        {
            let mut children = self.children.lock();
            if let Some(child) = children.get_mut(&process.pid) {
                return match child.try_wait() {
                    Ok(None) => ProcessStatus::Running,
                    Ok(Some(status)) => {
                        children.remove(&process.pid);
                        ProcessStatus::Exited(status.code())
                    }
                    Err(e) => {
                        warn!(pid = process.pid, error = %e, "failed to poll child");
                        ProcessStatus::Running
                    }
                };
            }
        }

        let Ok(raw) = i32::try_from(process.pid) else {
            return ProcessStatus::Exited(None);
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => ProcessStatus::Running,
            Err(_) => ProcessStatus::Exited(None),
        }
    }

    async fn wait_for_exit(&self, process: ProcessIdentity, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let ProcessStatus::Exited(_) = self.status(process).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }
}
