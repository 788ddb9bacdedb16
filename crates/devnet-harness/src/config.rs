//! Harness configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment.
//! Every orchestration component receives the values it needs explicitly; no
//! component reads the environment on its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use devnet_core::{DevnetError, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the asset root
pub const ROOT_ENV: &str = "DEVNET_ROOT";
/// Environment variable naming an external node launcher
pub const LAUNCHER_ENV: &str = "DEVNET_LAUNCHER";

/// Harness-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory holding one subdirectory per network
    pub root_dir: PathBuf,
    /// Network operated on when none is given
    pub network: String,
    /// External launcher used instead of invoking node binaries directly
    pub launcher: Option<PathBuf>,
    /// Where staged builds live, defaults to `<root_dir>/stages`
    pub stages_dir: Option<PathBuf>,
    /// File name of the node executable inside a stage directory
    pub node_binary_name: String,
    /// Await poll interval
    pub poll_interval_ms: u64,
    /// Await timeout
    pub await_timeout_secs: u64,
    /// Grace period before a stop escalates to SIGKILL
    pub stop_grace_secs: u64,
    /// Per-request RPC timeout
    pub rpc_timeout_ms: u64,
    /// RPC attempts before a node is reported unavailable
    pub rpc_attempts: u32,
    /// Backoff after the first failed RPC attempt
    pub rpc_backoff_ms: u64,
    /// How long an upgrade may wait for its activation point
    pub activation_timeout_secs: u64,
    /// How long the fleet has to converge after a swap
    pub verification_timeout_secs: u64,
    /// Pause after a restart before the process is confirmed alive
    pub restart_settle_ms: u64,
    /// Delegation rate used in bonding bids
    pub delegation_rate: u8,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("devnet-assets"),
            network: "devnet-1".to_string(),
            launcher: None,
            stages_dir: None,
            node_binary_name: "node".to_string(),
            poll_interval_ms: 1_000,
            await_timeout_secs: 300,
            stop_grace_secs: 10,
            rpc_timeout_ms: 2_000,
            rpc_attempts: 3,
            rpc_backoff_ms: 250,
            activation_timeout_secs: 3_600,
            verification_timeout_secs: 300,
            restart_settle_ms: 500,
            delegation_rate: 10,
        }
    }
}

impl HarnessConfig {
    /// Load from `path` when it exists, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    DevnetError::configuration(format!(
                        "failed to read config {}: {e}",
                        path.display()
                    ))
                })?;
                toml::from_str(&contents).map_err(|e| {
                    DevnetError::configuration(format!(
                        "failed to parse config {}: {e}",
                        path.display()
                    ))
                })?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ROOT_ENV).filter(|v| !v.is_empty()) {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(launcher) = lookup(LAUNCHER_ENV).filter(|v| !v.is_empty()) {
            self.launcher = Some(PathBuf::from(launcher));
        }
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(DevnetError::configuration("poll interval must be positive"));
        }
        if self.rpc_attempts == 0 {
            return Err(DevnetError::configuration("rpc attempts must be at least 1"));
        }
        if self.node_binary_name.is_empty() || self.node_binary_name.contains('/') {
            return Err(DevnetError::configuration(format!(
                "invalid node binary name '{}'",
                self.node_binary_name
            )));
        }
        Ok(())
    }

    /// Network directory for `network`
    pub fn network_dir(&self, network: &str) -> PathBuf {
        self.root_dir.join(network)
    }

    /// Stage directory for builds
    pub fn stages_dir(&self) -> PathBuf {
        self.stages_dir
            .clone()
            .unwrap_or_else(|| self.root_dir.join("stages"))
    }

    /// Resolve the launcher to an executable path, searching `PATH` for bare names
    pub fn resolve_launcher(&self) -> Result<Option<PathBuf>> {
        let Some(launcher) = &self.launcher else {
            return Ok(None);
        };
        if launcher.components().count() > 1 || launcher.is_absolute() {
            if !launcher.is_file() {
                return Err(DevnetError::configuration(format!(
                    "launcher {} does not exist",
                    launcher.display()
                )));
            }
            return Ok(Some(launcher.clone()));
        }
        which::which(launcher).map(Some).map_err(|e| {
            DevnetError::configuration(format!(
                "launcher '{}' not found on PATH: {e}",
                launcher.display()
            ))
        })
    }

    /// Await poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Await timeout
    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_timeout_secs)
    }

    /// Stop grace period
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// RPC request timeout
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Activation wait timeout
    pub fn activation_timeout(&self) -> Duration {
        Duration::from_secs(self.activation_timeout_secs)
    }

    /// Verification timeout
    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_secs)
    }

    /// Post-restart settle time
    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }
}
