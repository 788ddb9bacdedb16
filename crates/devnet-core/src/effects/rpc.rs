//! Node RPC collaborator
//!
//! The harness consumes the node's RPC surface but does not own its schema.
//! Response types keep only the fields orchestration needs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::asset::NodeDescriptor;
use crate::ids::NodeId;

/// Where to reach one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    /// Node behind the endpoint
    pub node: NodeId,
    /// JSON-RPC URL
    pub rpc_url: String,
    /// Metrics URL
    pub metrics_url: String,
}

impl From<&NodeDescriptor> for NodeEndpoint {
    fn from(descriptor: &NodeDescriptor) -> Self {
        Self {
            node: descriptor.id,
            rpc_url: descriptor.rpc_url(),
            metrics_url: descriptor.metrics_url(),
        }
    }
}

/// Failure talking to a node.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// Connection refused, reset or timed out
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// The node answered with a JSON-RPC error
    #[error("rejected ({code}): {message}")]
    Rejected {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },
    /// The node answered with something we could not decode
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RpcError {
    /// Whether a retry might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Unreachable(_))
    }
}

/// Connected peer entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Peer node id as reported by the node
    pub node_id: String,
    /// Peer address
    pub address: String,
}

/// Summary of the last block a node added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block hash
    pub hash: String,
    /// Block height
    pub height: u64,
    /// Era the block belongs to
    pub era_id: u64,
    /// Global state root after the block
    pub state_root_hash: String,
}

/// Upgrade the node has been told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextUpgrade {
    /// Activation point as reported
    pub activation_point: serde_json::Value,
    /// Version that activates there
    pub protocol_version: String,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Version of the node's API, which tracks the protocol version
    pub api_version: String,
    /// Connected peers
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
    /// Last added block, absent before genesis
    #[serde(default)]
    pub last_added_block_info: Option<BlockSummary>,
    /// Pending upgrade, if any
    #[serde(default)]
    pub next_upgrade: Option<NextUpgrade>,
}

/// Answer to an era summary query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraSummary {
    /// Era id
    pub era_id: u64,
    /// Switch block closing the era
    pub block_hash: String,
    /// State root at the switch block
    pub state_root_hash: String,
}

/// Counters scraped from the metrics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    /// Sample name to value
    pub samples: BTreeMap<String, f64>,
}

impl NodeMetrics {
    /// Sample named `name`
    pub fn get(&self, name: &str) -> Option<f64> {
        self.samples.get(name).copied()
    }

    /// Parse Prometheus text exposition format, ignoring labels and comments
    pub fn parse_prometheus(text: &str) -> Self {
        let samples = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let name = parts.next()?;
                let value: f64 = parts.next()?.parse().ok()?;
                let name = name.split('{').next().unwrap_or(name);
                Some((name.to_string(), value))
            })
            .collect();
        Self { samples }
    }
}

/// Bid submitted when a node bonds into the validator set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidRequest {
    /// Validator public key
    pub public_key: String,
    /// Stake to bond
    pub amount: u64,
    /// Delegation rate in percent
    pub delegation_rate: u8,
}

/// Withdrawal submitted when a node unbonds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawBidRequest {
    /// Validator public key
    pub public_key: String,
    /// Stake to withdraw
    pub amount: u64,
}

/// Acknowledgement of a submitted bonding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondingReceipt {
    /// Hash of the submitted deploy
    pub deploy_hash: String,
}

/// Request/response calls against one node's RPC surface.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Status query: height, era, peers, version
    async fn get_status(&self, endpoint: &NodeEndpoint) -> Result<NodeStatus, RpcError>;

    /// Block query, latest block when `height` is `None`
    async fn get_block(
        &self,
        endpoint: &NodeEndpoint,
        height: Option<u64>,
    ) -> Result<BlockSummary, RpcError>;

    /// Summary of the latest completed era
    async fn get_era_summary(&self, endpoint: &NodeEndpoint) -> Result<EraSummary, RpcError>;

    /// Scrape the metrics endpoint
    async fn get_metrics(&self, endpoint: &NodeEndpoint) -> Result<NodeMetrics, RpcError>;

    /// Submit a bid to join the validator set
    async fn submit_bid(
        &self,
        endpoint: &NodeEndpoint,
        bid: &BidRequest,
    ) -> Result<BondingReceipt, RpcError>;

    /// Submit a bid withdrawal to leave the validator set
    async fn withdraw_bid(
        &self,
        endpoint: &NodeEndpoint,
        withdrawal: &WithdrawBidRequest,
    ) -> Result<BondingReceipt, RpcError>;
}
