//! Chain state monitor
//!
//! Turns raw node RPC answers into [`ChainSnapshot`]s. A transient failure is
//! retried with backoff before the node is reported unavailable; failures never
//! change fleet state.

use std::sync::Arc;

use chrono::Utc;
use devnet_core::effects::{
    BlockSummary, EraSummary, NodeEndpoint, NodeMetrics, NodeRpc, NodeStatus, RpcError,
};
use devnet_core::{ChainSnapshot, DevnetError, NodeId, ProtocolVersion, Result};
use futures::future::join_all;
use tracing::debug;

use crate::assets::AssetManager;
use crate::retry::RetryPolicy;

/// Read-only view of the chain through node RPC.
pub struct ChainStateMonitor {
    rpc: Arc<dyn NodeRpc>,
    assets: Arc<AssetManager>,
    retry: RetryPolicy,
}

impl ChainStateMonitor {
    /// Monitor retrying transient failures per `retry`
    pub fn new(rpc: Arc<dyn NodeRpc>, assets: Arc<AssetManager>, retry: RetryPolicy) -> Self {
        Self { rpc, assets, retry }
    }

    /// Current chain state as seen by `node`
    pub async fn snapshot(&self, node: NodeId) -> Result<ChainSnapshot> {
        let endpoint = self.endpoint(node)?;
        let status = self
            .retry
            .execute(|| self.rpc.get_status(&endpoint), RpcError::is_transient)
            .await
            .map_err(|e| DevnetError::rpc_unavailable(node, e.to_string()))?;
        normalize(node, status)
    }

    /// Snapshot every node in `nodes` concurrently
    pub async fn fleet_snapshots(&self, nodes: &[NodeId]) -> Vec<(NodeId, Result<ChainSnapshot>)> {
        let results = join_all(nodes.iter().map(|node| self.snapshot(*node))).await;
        nodes.iter().copied().zip(results).collect()
    }

    /// Block at `height`, or the latest block
    pub async fn block(&self, node: NodeId, height: Option<u64>) -> Result<BlockSummary> {
        let endpoint = self.endpoint(node)?;
        self.retry
            .execute(|| self.rpc.get_block(&endpoint, height), RpcError::is_transient)
            .await
            .map_err(|e| DevnetError::rpc_unavailable(node, e.to_string()))
    }

    /// Summary of the latest completed era
    pub async fn era_summary(&self, node: NodeId) -> Result<EraSummary> {
        let endpoint = self.endpoint(node)?;
        self.retry
            .execute(|| self.rpc.get_era_summary(&endpoint), RpcError::is_transient)
            .await
            .map_err(|e| DevnetError::rpc_unavailable(node, e.to_string()))
    }

    /// Scraped metrics
    pub async fn metrics(&self, node: NodeId) -> Result<NodeMetrics> {
        let endpoint = self.endpoint(node)?;
        self.retry
            .execute(|| self.rpc.get_metrics(&endpoint), RpcError::is_transient)
            .await
            .map_err(|e| DevnetError::rpc_unavailable(node, e.to_string()))
    }

    fn endpoint(&self, node: NodeId) -> Result<NodeEndpoint> {
        Ok(NodeEndpoint::from(&self.assets.node(node)?))
    }
}

/// Normalize a status answer. A node that has not produced a block yet reports
/// height 0, era 0 and no state root.
pub fn normalize(node: NodeId, status: NodeStatus) -> Result<ChainSnapshot> {
    let protocol_version: ProtocolVersion = status.api_version.parse().map_err(|_| {
        DevnetError::rpc_unavailable(
            node,
            format!("unparseable api_version '{}'", status.api_version),
        )
    })?;
    let (height, era, state_root) = match status.last_added_block_info {
        Some(block) => (block.height, block.era_id, Some(block.state_root_hash)),
        None => (0, 0, None),
    };
    let snapshot = ChainSnapshot {
        node,
        height,
        era,
        state_root,
        peers: u32::try_from(status.peers.len()).unwrap_or(u32::MAX),
        protocol_version,
        captured_at: Utc::now(),
    };
    debug!(%node, height, era, version = %snapshot.protocol_version, "observed chain state");
    Ok(snapshot)
}
