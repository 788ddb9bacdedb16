//! Collaborator traits
//!
//! The orchestrator talks to the outside world only through these traits:
//! node RPC, process supervision and binary provenance. Production adapters
//! live in `devnet-harness`; simulated ones in `devnet-testkit`.

pub mod provenance;
pub mod rpc;
pub mod supervisor;

pub use provenance::{BinaryProvenance, ProvenanceError, StagedArtifacts};
pub use rpc::{
    BidRequest, BlockSummary, BondingReceipt, EraSummary, NextUpgrade, NodeEndpoint, NodeMetrics,
    NodeRpc, NodeStatus, PeerEntry, RpcError, WithdrawBidRequest,
};
pub use supervisor::{LaunchSpec, ProcessStatus, ProcessSupervisor, SupervisorError};
