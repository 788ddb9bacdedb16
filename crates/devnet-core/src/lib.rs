//! devnet core
//!
//! Data model, error taxonomy and collaborator traits shared by the devnet
//! harness and its testkit. Nothing in this crate performs I/O beyond reading
//! a settings file.

pub mod asset;
pub mod chain;
pub mod chainspec;
pub mod condition;
pub mod effects;
pub mod errors;
pub mod ids;
pub mod process;
pub mod roster;
pub mod settings;
pub mod upgrade;

pub use asset::{NetworkAsset, NodeDescriptor, NodePorts, NodeTemplate};
pub use chain::{ActivationPoint, ChainSnapshot};
pub use chainspec::{Chainspec, ChainspecDelta, GenesisAccount, GenesisAccounts};
pub use condition::{AwaitCondition, Predicate, SourcePolicy};
pub use errors::{DevnetError, ProcessErrorKind, Result, UpgradeErrorKind};
pub use ids::{NodeId, ProtocolVersion};
pub use process::{NodeLifecycle, NodeProcess, ProcessIdentity};
pub use roster::FleetRoster;
pub use settings::{NetworkSettings, PortSettings};
pub use upgrade::{PhaseTransition, RolloutStrategy, UpgradePhase, UpgradePlan, UpgradeRun};
