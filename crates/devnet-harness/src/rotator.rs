//! Node set rotator
//!
//! Grows and shrinks the fleet while the chain runs. Both directions take the
//! phase lock, so membership never changes under an activating upgrade.

use std::sync::Arc;
use std::time::Duration;

use devnet_core::effects::{BidRequest, NodeEndpoint, NodeRpc, RpcError, WithdrawBidRequest};
use devnet_core::{DevnetError, NodeDescriptor, NodeId, NodeTemplate, Result};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assets::AssetManager;
use crate::fleet::FleetController;
use crate::phase_lock::PhaseLock;
use crate::roster::RosterStore;

/// Settings for membership changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatorSettings {
    /// Whether joins and leaves issue bonding requests
    pub bonding: bool,
    /// Delegation rate in submitted bids
    pub delegation_rate: u8,
    /// Grace period when stopping a leaving node
    pub stop_grace: Duration,
}

/// What happened to a joining node's bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BondingOutcome {
    /// Bid accepted by a peer
    Submitted {
        /// Deploy hash of the bid
        deploy_hash: String,
        /// Peer that accepted it
        via: NodeId,
    },
    /// Bonding disabled for this join
    Skipped,
    /// No peer accepted the bid; the node runs but is not bonded
    Failed {
        /// Last error seen
        reason: String,
    },
}

/// Result of a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReport {
    /// The new node
    pub node: NodeId,
    /// Its bid
    pub bonding: BondingOutcome,
}

/// Adds and removes fleet members.
pub struct NodeSetRotator {
    assets: Arc<AssetManager>,
    fleet: Arc<FleetController>,
    roster: Arc<RosterStore>,
    rpc: Arc<dyn NodeRpc>,
    phase_lock: PhaseLock,
    settings: RotatorSettings,
}

impl NodeSetRotator {
    /// Assemble a rotator
    pub fn new(
        assets: Arc<AssetManager>,
        fleet: Arc<FleetController>,
        roster: Arc<RosterStore>,
        rpc: Arc<dyn NodeRpc>,
        phase_lock: PhaseLock,
        settings: RotatorSettings,
    ) -> Self {
        Self {
            assets,
            fleet,
            roster,
            rpc,
            phase_lock,
            settings,
        }
    }

    /// Add a node: generate assets, admit, start, then bond through a peer.
    ///
    /// A failed start leaves the node admitted and Stopped, and returns the
    /// process error.
    pub async fn join(&self, template: &NodeTemplate) -> Result<JoinReport> {
        let _guard = self.phase_lock.try_acquire("join")?;
        let descriptor = self.assets.add_node(template, &mut OsRng)?;
        let node = descriptor.id;
        self.roster.admit(node)?;
        self.fleet.register(node);
        self.fleet.start(node).await?;

        let bonding = if self.settings.bonding && !template.skip_bonding {
            self.bond(&descriptor).await
        } else {
            BondingOutcome::Skipped
        };
        if let BondingOutcome::Failed { reason } = &bonding {
            warn!(%node, %reason, "joined without bonding");
        }
        info!(%node, members = self.roster.members().len(), "node joined");
        Ok(JoinReport { node, bonding })
    }

    /// Remove a node: withdraw its bid, stop it, evict it.
    ///
    /// A roster violation or an unbonding failure aborts before any side
    /// effect. An ungraceful stop is logged and the eviction proceeds.
    pub async fn leave(&self, node: NodeId) -> Result<()> {
        let _guard = self.phase_lock.try_acquire("leave")?;
        self.roster.check_evict(node)?;
        let descriptor = self.assets.node(node)?;

        if self.settings.bonding {
            self.unbond(&descriptor).await?;
        }

        match self.fleet.stop_with_grace(node, self.settings.stop_grace).await {
            Ok(()) => {}
            Err(e) if e.is_ungraceful_stop() => warn!(%node, "forced stop while leaving"),
            Err(e) => return Err(e),
        }
        self.roster.evict(node)?;
        self.fleet.deregister(node).await?;
        info!(%node, members = self.roster.members().len(), "node left");
        Ok(())
    }

    async fn bond(&self, descriptor: &NodeDescriptor) -> BondingOutcome {
        let bid = BidRequest {
            public_key: descriptor.public_key.clone(),
            amount: descriptor.stake,
            delegation_rate: self.settings.delegation_rate,
        };
        let mut reason = String::from("no peer to submit through");
        for peer in self.peers_for(descriptor.id) {
            match self.rpc.submit_bid(&peer, &bid).await {
                Ok(receipt) => {
                    info!(node = %descriptor.id, via = %peer.node, deploy = %receipt.deploy_hash, "bid submitted");
                    return BondingOutcome::Submitted {
                        deploy_hash: receipt.deploy_hash,
                        via: peer.node,
                    };
                }
                Err(e) => reason = e.to_string(),
            }
        }
        BondingOutcome::Failed { reason }
    }

    async fn unbond(&self, descriptor: &NodeDescriptor) -> Result<()> {
        let withdrawal = WithdrawBidRequest {
            public_key: descriptor.public_key.clone(),
            amount: descriptor.stake,
        };
        let mut peers = self.peers_for(descriptor.id);
        peers.push(NodeEndpoint::from(descriptor));

        let mut last: Option<RpcError> = None;
        for peer in &peers {
            match self.rpc.withdraw_bid(peer, &withdrawal).await {
                Ok(receipt) => {
                    info!(node = %descriptor.id, via = %peer.node, deploy = %receipt.deploy_hash, "bid withdrawn");
                    return Ok(());
                }
                Err(e) => last = Some(e),
            }
        }
        Err(DevnetError::rpc_unavailable(
            descriptor.id,
            last.map(|e| e.to_string())
                .unwrap_or_else(|| "no peer to withdraw through".to_string()),
        ))
    }

    /// Endpoints of members other than `node`, in roster order
    fn peers_for(&self, node: NodeId) -> Vec<NodeEndpoint> {
        self.roster
            .members()
            .into_iter()
            .filter(|member| *member != node)
            .filter_map(|member| self.assets.node(member).ok())
            .map(|descriptor| NodeEndpoint::from(&descriptor))
            .collect()
    }
}
