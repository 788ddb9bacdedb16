//! Node identifiers and protocol versions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DevnetError;

/// Stable 1-based identifier of a node within one network.
///
/// Ids are assigned in ascending order and never reused, so a node keeps its id
/// (and its on-disk directory) across restarts and upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u16);

impl NodeId {
    /// Wrap a raw index
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Raw index
    pub const fn index(self) -> u16 {
        self.0
    }

    /// Directory name used under `nodes/`
    pub fn dir_name(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = DevnetError;

    /// Accepts `3` or `node-3`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let digits = raw.strip_prefix("node-").unwrap_or(raw);
        let index: u16 = digits
            .parse()
            .map_err(|_| DevnetError::configuration(format!("invalid node id '{s}'")))?;
        if index == 0 {
            return Err(DevnetError::configuration("node ids start at 1"));
        }
        Ok(Self(index))
    }
}

/// Semantic protocol version of the node software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
    /// Patch component
    pub patch: u32,
}

impl ProtocolVersion {
    /// Construct from components
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// On-disk form, e.g. `1_4_0`
    pub fn dir_name(&self) -> String {
        format!("{}_{}_{}", self.major, self.minor, self.patch)
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProtocolVersion {
    type Err = DevnetError;

    /// Accepts `1.4.0`, `1_4_0` and build strings such as `1.4.0-abc123`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let core = s.trim().split(['-', '+']).next().unwrap_or_default();
        let parts: Vec<&str> = core.split(['.', '_']).collect();
        if parts.len() != 3 {
            return Err(DevnetError::configuration(format!(
                "invalid protocol version '{s}'"
            )));
        }
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| DevnetError::configuration(format!("invalid protocol version '{s}'")))
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = DevnetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}
