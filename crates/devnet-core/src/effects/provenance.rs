//! Binary provenance collaborator

use std::path::PathBuf;

use async_trait::async_trait;

use crate::chainspec::Chainspec;
use crate::ids::ProtocolVersion;

/// A compiled node build ready to be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifacts {
    /// Version the build implements
    pub version: ProtocolVersion,
    /// Path of the node executable
    pub binary: PathBuf,
    /// Chainspec shipped with the build, if it carries one
    pub chainspec: Option<Chainspec>,
}

/// Failure looking up a build.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvenanceError {
    /// No build exists for the version
    #[error("version {0} is not available")]
    Unavailable(ProtocolVersion),
    /// A build exists but is unusable
    #[error("version {version} is invalid: {reason}")]
    Invalid {
        /// Version looked up
        version: ProtocolVersion,
        /// What is wrong with it
        reason: String,
    },
}

/// Supplies node builds by protocol version.
#[async_trait]
pub trait BinaryProvenance: Send + Sync {
    /// Fetch the build for `version`
    async fn fetch(&self, version: &ProtocolVersion) -> Result<StagedArtifacts, ProvenanceError>;

    /// All versions that can be fetched
    async fn available(&self) -> Vec<ProtocolVersion>;
}
