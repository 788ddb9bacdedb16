//! Chainspec and genesis accounts
//!
//! The chainspec is the declarative description of network, genesis and
//! protocol parameters a node reads at startup. Upgrades stage a new chainspec
//! per protocol version by applying a [`ChainspecDelta`] to the current one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::ActivationPoint;
use crate::ids::ProtocolVersion;

/// Network-wide chainspec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chainspec {
    /// Protocol section
    pub protocol: ProtocolSection,
    /// Network section
    pub network: NetworkSection,
    /// Core consensus parameters
    pub core: CoreSection,
}

/// `[protocol]` section of the chainspec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSection {
    /// Version this chainspec describes
    pub version: ProtocolVersion,
    /// Where this version becomes active
    pub activation_point: ActivationPoint,
    /// Whether nodes discard blocks past the activation point on restart
    #[serde(default)]
    pub hard_reset: bool,
    /// Era of the last emergency restart, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_emergency_restart: Option<u64>,
}

/// `[network]` section of the chainspec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSection {
    /// Human readable network name
    pub name: String,
    /// Genesis timestamp
    pub genesis_timestamp: DateTime<Utc>,
}

/// `[core]` section of the chainspec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreSection {
    /// Maximum size of the validator set
    pub validator_slots: u32,
    /// Blocks in one era
    pub blocks_per_era: u64,
    /// Eras between a bid and its effect on the validator set
    pub auction_delay: u64,
    /// Eras before unbonded stake is released
    pub unbonding_delay: u64,
}

/// Partial override applied to a chainspec when staging an upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainspecDelta {
    /// New protocol version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<ProtocolVersion>,
    /// New activation point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_point: Option<ActivationPoint>,
    /// New validator slot count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_slots: Option<u32>,
    /// Override for `hard_reset`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_reset: Option<bool>,
    /// Override for `last_emergency_restart`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_emergency_restart: Option<u64>,
}

impl Chainspec {
    /// Return a copy with `delta` applied
    pub fn apply(&self, delta: &ChainspecDelta) -> Chainspec {
        let mut next = self.clone();
        if let Some(version) = delta.protocol_version {
            next.protocol.version = version;
        }
        if let Some(point) = delta.activation_point {
            next.protocol.activation_point = point;
        }
        if let Some(slots) = delta.validator_slots {
            next.core.validator_slots = slots;
        }
        if let Some(hard_reset) = delta.hard_reset {
            next.protocol.hard_reset = hard_reset;
        }
        if let Some(era) = delta.last_emergency_restart {
            next.protocol.last_emergency_restart = Some(era);
        }
        next
    }
}

/// Genesis account entry in `accounts.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Hex encoded public key
    pub public_key: String,
    /// Liquid balance in motes
    pub balance: u64,
    /// Bonded stake, zero for non-validators
    pub bonded_amount: u64,
}

/// Contents of `accounts.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccounts {
    /// One entry per genesis account
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chainspec() -> Chainspec {
        Chainspec {
            protocol: ProtocolSection {
                version: ProtocolVersion::new(1, 0, 0),
                activation_point: ActivationPoint::EraId(0),
                hard_reset: false,
                last_emergency_restart: None,
            },
            network: NetworkSection {
                name: "devnet-test".into(),
                genesis_timestamp: DateTime::<Utc>::UNIX_EPOCH,
            },
            core: CoreSection {
                validator_slots: 5,
                blocks_per_era: 10,
                auction_delay: 1,
                unbonding_delay: 7,
            },
        }
    }

    #[test]
    fn test_delta_only_touches_named_fields() {
        let base = chainspec();
        let delta = ChainspecDelta {
            protocol_version: Some(ProtocolVersion::new(1, 1, 0)),
            activation_point: Some(ActivationPoint::EraId(3)),
            ..Default::default()
        };
        let next = base.apply(&delta);
        assert_eq!(next.protocol.version, ProtocolVersion::new(1, 1, 0));
        assert_eq!(next.protocol.activation_point, ActivationPoint::EraId(3));
        assert_eq!(next.core, base.core);
        assert_eq!(next.network, base.network);
    }

    #[test]
    fn test_chainspec_toml_shape() {
        let text = toml::to_string(&chainspec()).unwrap();
        assert!(text.contains("[protocol]"));
        assert!(text.contains("era_id = 0"));
        let back: Chainspec = toml::from_str(&text).unwrap();
        assert_eq!(back, chainspec());
    }
}
