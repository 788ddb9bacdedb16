//! devnet harness
//!
//! Stands up a multi-node proof-of-stake network on one machine and drives it
//! through its lifecycle: asset generation, process supervision, chain
//! observation, condition waits, protocol upgrades and membership changes.
//!
//! [`Harness`] assembles the components for one network. Each component can
//! also be used on its own with substitute collaborators from
//! `devnet_core::effects`.

pub mod assets;
pub mod await_engine;
pub mod config;
pub mod fleet;
pub mod harness;
pub mod monitor;
pub mod phase_lock;
pub mod provenance;
pub mod retry;
pub mod roster;
pub mod rotator;
pub mod rpc;
pub mod supervisor;
pub mod ticker;
pub mod upgrade;

pub use assets::AssetManager;
pub use await_engine::AwaitEngine;
pub use config::HarnessConfig;
pub use fleet::FleetController;
pub use harness::{Collaborators, Harness};
pub use monitor::ChainStateMonitor;
pub use phase_lock::PhaseLock;
pub use retry::RetryPolicy;
pub use roster::RosterStore;
pub use rotator::{BondingOutcome, JoinReport, NodeSetRotator, RotatorSettings};
pub use ticker::{Cancellation, PollTicker, Tick};
pub use upgrade::{UpgradeOrchestrator, UpgradeSettings};
