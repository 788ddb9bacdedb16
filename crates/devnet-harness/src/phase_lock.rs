//! Exclusive lock over fleet-wide mutations
//!
//! Held while an upgrade swaps binaries and while the roster changes, so the
//! two never interleave. The lock is both in-process and a lock file, which
//! keeps a second `devnet` invocation on the same network out as well.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use devnet_core::{DevnetError, Result, UpgradeErrorKind};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Process- and filesystem-wide mutual exclusion for one network.
#[derive(Debug, Clone)]
pub struct PhaseLock {
    inner: Arc<Mutex<()>>,
    path: PathBuf,
}

/// Proof of holding the [`PhaseLock`]; released on drop.
#[derive(Debug)]
pub struct PhaseGuard {
    _held: OwnedMutexGuard<()>,
    path: PathBuf,
}

impl PhaseLock {
    /// Lock backed by the file at `path`
    pub fn new(path: &Path) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            path: path.to_path_buf(),
        }
    }

    /// Take the lock without waiting, failing with `upgrade-in-progress`
    pub fn try_acquire(&self, holder: &str) -> Result<PhaseGuard> {
        let held = self.inner.clone().try_lock_owned().map_err(|_| {
            DevnetError::upgrade(
                UpgradeErrorKind::PhaseLocked,
                Vec::new(),
                "another fleet-wide operation is in progress",
            )
        })?;

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{holder}") {
                    warn!(error = %e, "failed to record phase lock holder");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let owner = std::fs::read_to_string(&self.path).unwrap_or_default();
                return Err(DevnetError::upgrade(
                    UpgradeErrorKind::PhaseLocked,
                    Vec::new(),
                    format!(
                        "{} is held by '{}'; remove it if that run is gone",
                        self.path.display(),
                        owner.trim()
                    ),
                ));
            }
            Err(e) => return Err(e.into()),
        }
        debug!(holder, "acquired phase lock");
        Ok(PhaseGuard {
            _held: held,
            path: self.path.clone(),
        })
    }

    /// Whether anyone holds the lock
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err() || self.path.exists()
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("released phase lock"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "failed to remove phase lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PhaseLock::new(&dir.path().join("upgrade.lock"));
        let guard = lock.try_acquire("run-a").unwrap();
        let err = lock.try_acquire("run-b").unwrap_err();
        assert!(matches!(
            err,
            DevnetError::Upgrade {
                kind: UpgradeErrorKind::PhaseLocked,
                ..
            }
        ));
        assert!(lock.is_held());
        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire("run-b").is_ok());
    }

    #[test]
    fn test_foreign_lock_file_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upgrade.lock");
        std::fs::write(&path, "other-process\n").unwrap();
        let lock = PhaseLock::new(&path);
        let err = lock.try_acquire("run-a").unwrap_err();
        assert!(err.to_string().contains("other-process"));
    }
}
