//! Staged build directory
//!
//! Builds are dropped under `<stages>/<major_minor_patch>/` as an executable
//! plus an optional `chainspec.toml` carrying the version's chainspec.

use std::path::PathBuf;

use async_trait::async_trait;
use devnet_core::effects::{BinaryProvenance, ProvenanceError, StagedArtifacts};
use devnet_core::{Chainspec, ProtocolVersion};

/// [`BinaryProvenance`] reading a local stage directory.
#[derive(Debug, Clone)]
pub struct StagedBinaryStore {
    stages_dir: PathBuf,
    binary_name: String,
}

impl StagedBinaryStore {
    /// Store rooted at `stages_dir`
    pub fn new(stages_dir: impl Into<PathBuf>, binary_name: impl Into<String>) -> Self {
        Self {
            stages_dir: stages_dir.into(),
            binary_name: binary_name.into(),
        }
    }

    fn stage_dir(&self, version: &ProtocolVersion) -> PathBuf {
        self.stages_dir.join(version.dir_name())
    }
}

#[async_trait]
impl BinaryProvenance for StagedBinaryStore {
    async fn fetch(&self, version: &ProtocolVersion) -> Result<StagedArtifacts, ProvenanceError> {
        let dir = self.stage_dir(version);
        let binary = dir.join(&self.binary_name);
        if !binary.is_file() {
            return Err(ProvenanceError::Unavailable(*version));
        }

        let chainspec_path = dir.join("chainspec.toml");
        let chainspec = if chainspec_path.is_file() {
            let contents =
                std::fs::read_to_string(&chainspec_path).map_err(|e| ProvenanceError::Invalid {
                    version: *version,
                    reason: e.to_string(),
                })?;
            let chainspec: Chainspec =
                toml::from_str(&contents).map_err(|e| ProvenanceError::Invalid {
                    version: *version,
                    reason: format!("chainspec.toml: {e}"),
                })?;
            if chainspec.protocol.version != *version {
                return Err(ProvenanceError::Invalid {
                    version: *version,
                    reason: format!(
                        "chainspec declares version {}",
                        chainspec.protocol.version
                    ),
                });
            }
            Some(chainspec)
        } else {
            None
        };

        Ok(StagedArtifacts {
            version: *version,
            binary,
            chainspec,
        })
    }

    async fn available(&self) -> Vec<ProtocolVersion> {
        let Ok(entries) = std::fs::read_dir(&self.stages_dir) else {
            return Vec::new();
        };
        let mut versions: Vec<ProtocolVersion> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .filter(|version| self.stage_dir(version).join(&self.binary_name).is_file())
            .collect();
        versions.sort();
        versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_and_list() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1_0_0", "1_1_0"] {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
            std::fs::write(dir.path().join(name).join("node"), b"bin").unwrap();
        }
        std::fs::create_dir_all(dir.path().join("scratch")).unwrap();

        let store = StagedBinaryStore::new(dir.path(), "node");
        assert_eq!(
            store.available().await,
            vec![ProtocolVersion::new(1, 0, 0), ProtocolVersion::new(1, 1, 0)]
        );
        let artifacts = store.fetch(&ProtocolVersion::new(1, 1, 0)).await.unwrap();
        assert!(artifacts.binary.ends_with("1_1_0/node"));
        assert!(artifacts.chainspec.is_none());
        assert!(matches!(
            store.fetch(&ProtocolVersion::new(9, 0, 0)).await,
            Err(ProvenanceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_chainspec_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let stage = dir.path().join("2_0_0");
        std::fs::create_dir_all(&stage).unwrap();
        std::fs::write(stage.join("node"), b"bin").unwrap();
        std::fs::write(stage.join("chainspec.toml"), "not = [valid").unwrap();

        let store = StagedBinaryStore::new(dir.path(), "node");
        assert!(matches!(
            store.fetch(&ProtocolVersion::new(2, 0, 0)).await,
            Err(ProvenanceError::Invalid { .. })
        ));
    }
}
