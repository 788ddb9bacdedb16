//! Simulated chain
//!
//! A [`NodeRpc`] backed by a clock instead of a network. Height advances one
//! block per `block_interval` of tokio time, so tests under a paused runtime
//! run hours of chain in milliseconds. A node answers only while the
//! [`MockSupervisor`](crate::MockSupervisor) reports it running, and it
//! reports the version it was launched with.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use devnet_core::effects::{
    BidRequest, BlockSummary, BondingReceipt, EraSummary, NodeEndpoint, NodeMetrics, NodeRpc,
    NodeStatus, PeerEntry, RpcError, WithdrawBidRequest,
};
use devnet_core::{NodeId, ProtocolVersion};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Chain pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    /// Height at creation
    pub start_height: u64,
    /// Time per block
    pub block_interval: Duration,
    /// Blocks per era
    pub blocks_per_era: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            start_height: 0,
            block_interval: Duration::from_secs(1),
            blocks_per_era: 10,
        }
    }
}

#[derive(Debug, Default)]
struct SimNode {
    running: Option<ProtocolVersion>,
    unreachable: bool,
    frozen_height: Option<u64>,
}

#[derive(Debug)]
struct ChainState {
    params: ChainParams,
    origin: Instant,
    halted_at: Option<u64>,
    nodes: BTreeMap<NodeId, SimNode>,
    reject_bonding: bool,
    bids: Vec<BidRequest>,
    withdrawals: Vec<WithdrawBidRequest>,
    deploys: u64,
}

impl ChainState {
    fn height_at(&self, at: Instant) -> u64 {
        let interval = self.params.block_interval.as_millis().max(1);
        let elapsed = at.saturating_duration_since(self.origin).as_millis();
        let produced = u64::try_from(elapsed / interval).unwrap_or(u64::MAX);
        let height = self.params.start_height.saturating_add(produced);
        self.halted_at.map_or(height, |halt| height.min(halt))
    }

    fn node_view(&self, node: NodeId) -> Result<(ProtocolVersion, u64), RpcError> {
        let sim = self
            .nodes
            .get(&node)
            .ok_or_else(|| RpcError::Unreachable(format!("{node} is not running")))?;
        let version = sim
            .running
            .ok_or_else(|| RpcError::Unreachable(format!("{node} is not running")))?;
        if sim.unreachable {
            return Err(RpcError::Unreachable(format!("{node} connection refused")));
        }
        let height = sim.frozen_height.unwrap_or_else(|| self.height_at(Instant::now()));
        Ok((version, height))
    }

    fn era_of(&self, height: u64) -> u64 {
        height / self.params.blocks_per_era.max(1)
    }

    fn next_deploy(&mut self) -> String {
        self.deploys += 1;
        format!("{:064x}", self.deploys)
    }
}

/// Clock-driven chain shared by every simulated node.
#[derive(Debug)]
pub struct SimulatedChain {
    state: Mutex<ChainState>,
}

impl SimulatedChain {
    /// Chain starting at `params.start_height` now
    pub fn new(params: ChainParams) -> Self {
        Self {
            state: Mutex::new(ChainState {
                params,
                origin: Instant::now(),
                halted_at: None,
                nodes: BTreeMap::new(),
                reject_bonding: false,
                bids: Vec::new(),
                withdrawals: Vec::new(),
                deploys: 0,
            }),
        }
    }

    /// Current height
    pub fn height(&self) -> u64 {
        self.height_at(Instant::now())
    }

    /// Height at `at`
    pub fn height_at(&self, at: Instant) -> u64 {
        self.state.lock().height_at(at)
    }

    /// Current era
    pub fn era(&self) -> u64 {
        let state = self.state.lock();
        state.era_of(state.height_at(Instant::now()))
    }

    /// Stop producing blocks at the current height
    pub fn halt(&self) {
        let mut state = self.state.lock();
        let height = state.height_at(Instant::now());
        state.halted_at = Some(height);
    }

    /// Resume block production from the halted height
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if let Some(height) = state.halted_at.take() {
            state.params.start_height = height;
            state.origin = Instant::now();
        }
    }

    /// Make `node` refuse connections while its process keeps running
    pub fn set_unreachable(&self, node: NodeId, unreachable: bool) {
        self.state.lock().nodes.entry(node).or_default().unreachable = unreachable;
    }

    /// Pin the height `node` reports, or release it with `None`
    pub fn freeze_node(&self, node: NodeId, height: Option<u64>) {
        self.state.lock().nodes.entry(node).or_default().frozen_height = height;
    }

    /// Reject every bid and withdrawal
    pub fn reject_bonding(&self, reject: bool) {
        self.state.lock().reject_bonding = reject;
    }

    /// Version `node` is running, if it is running
    pub fn running_version(&self, node: NodeId) -> Option<ProtocolVersion> {
        self.state.lock().nodes.get(&node).and_then(|sim| sim.running)
    }

    /// Bids accepted so far
    pub fn bids(&self) -> Vec<BidRequest> {
        self.state.lock().bids.clone()
    }

    /// Withdrawals accepted so far
    pub fn withdrawals(&self) -> Vec<WithdrawBidRequest> {
        self.state.lock().withdrawals.clone()
    }

    pub(crate) fn node_started(&self, node: NodeId, version: ProtocolVersion) {
        self.state.lock().nodes.entry(node).or_default().running = Some(version);
    }

    pub(crate) fn node_stopped(&self, node: NodeId) {
        if let Some(sim) = self.state.lock().nodes.get_mut(&node) {
            sim.running = None;
        }
    }

    fn bonding_gate(state: &ChainState, endpoint: &NodeEndpoint) -> Result<(), RpcError> {
        state.node_view(endpoint.node)?;
        if state.reject_bonding {
            return Err(RpcError::Rejected {
                code: -32000,
                message: "auction is closed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NodeRpc for SimulatedChain {
    async fn get_status(&self, endpoint: &NodeEndpoint) -> Result<NodeStatus, RpcError> {
        let state = self.state.lock();
        let (version, height) = state.node_view(endpoint.node)?;
        let peers = state
            .nodes
            .iter()
            .filter(|(id, sim)| **id != endpoint.node && sim.running.is_some())
            .map(|(id, _)| PeerEntry {
                node_id: id.to_string(),
                address: format!("sim://{id}"),
            })
            .collect();
        let last_added_block_info = (height > 0).then(|| block_summary(height, state.era_of(height)));
        Ok(NodeStatus {
            api_version: version.to_string(),
            peers,
            last_added_block_info,
            next_upgrade: None,
        })
    }

    async fn get_block(
        &self,
        endpoint: &NodeEndpoint,
        height: Option<u64>,
    ) -> Result<BlockSummary, RpcError> {
        let state = self.state.lock();
        let (_, tip) = state.node_view(endpoint.node)?;
        let height = height.unwrap_or(tip);
        if height > tip || height == 0 {
            return Err(RpcError::Rejected {
                code: -32001,
                message: format!("no block at height {height}"),
            });
        }
        Ok(block_summary(height, state.era_of(height)))
    }

    async fn get_era_summary(&self, endpoint: &NodeEndpoint) -> Result<EraSummary, RpcError> {
        let state = self.state.lock();
        let (_, tip) = state.node_view(endpoint.node)?;
        let era = state.era_of(tip);
        let switch = era * state.params.blocks_per_era.max(1);
        Ok(EraSummary {
            era_id: era,
            block_hash: format!("{switch:064x}"),
            state_root_hash: format!("{:064x}", switch.wrapping_mul(31)),
        })
    }

    async fn get_metrics(&self, endpoint: &NodeEndpoint) -> Result<NodeMetrics, RpcError> {
        let state = self.state.lock();
        let (_, height) = state.node_view(endpoint.node)?;
        let text = format!(
            "# TYPE chain_height gauge\nchain_height {height}\nconsensus_current_era {}\n",
            state.era_of(height)
        );
        Ok(NodeMetrics::parse_prometheus(&text))
    }

    async fn submit_bid(
        &self,
        endpoint: &NodeEndpoint,
        bid: &BidRequest,
    ) -> Result<BondingReceipt, RpcError> {
        let mut state = self.state.lock();
        Self::bonding_gate(&state, endpoint)?;
        state.bids.push(bid.clone());
        Ok(BondingReceipt {
            deploy_hash: state.next_deploy(),
        })
    }

    async fn withdraw_bid(
        &self,
        endpoint: &NodeEndpoint,
        withdrawal: &WithdrawBidRequest,
    ) -> Result<BondingReceipt, RpcError> {
        let mut state = self.state.lock();
        Self::bonding_gate(&state, endpoint)?;
        state.withdrawals.push(withdrawal.clone());
        Ok(BondingReceipt {
            deploy_hash: state.next_deploy(),
        })
    }
}

fn block_summary(height: u64, era: u64) -> BlockSummary {
    BlockSummary {
        hash: format!("{height:064x}"),
        height,
        era_id: era,
        state_root_hash: format!("{:064x}", height.wrapping_mul(31)),
    }
}
