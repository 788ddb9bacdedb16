//! devnet testing infrastructure
//!
//! Simulated collaborators and fixtures for exercising the harness without
//! real node processes or network access.
//!
//! ```rust,ignore
//! use devnet_testkit::TestNetworkBuilder;
//!
//! #[tokio::test(start_paused = true)]
//! async fn waits_for_blocks() {
//!     let net = TestNetworkBuilder::new().start_height(100).build().await;
//!     // drive net.harness, inspect net.chain and net.supervisor
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod chain;
pub mod network;
pub mod supervisor;

pub use chain::{ChainParams, SimulatedChain};
pub use network::{write_stage, TestNetwork, TestNetworkBuilder, TEST_NETWORK};
pub use supervisor::{EventKind, MockSupervisor, SupervisorEvent};

use tracing_subscriber::EnvFilter;

/// Route harness logs to the test writer; honours `RUST_LOG`
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
