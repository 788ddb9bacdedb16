//! JSON-RPC client for node endpoints

use std::time::Duration;

use async_trait::async_trait;
use devnet_core::effects::{
    BidRequest, BlockSummary, BondingReceipt, EraSummary, NodeEndpoint, NodeMetrics, NodeRpc,
    NodeStatus, RpcError, WithdrawBidRequest,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockEnvelope {
    block: BlockBody,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    hash: String,
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: u64,
    era_id: u64,
    state_root_hash: String,
}

#[derive(Debug, Deserialize)]
struct EraSummaryEnvelope {
    era_summary: EraSummary,
}

/// [`NodeRpc`] over HTTP JSON-RPC.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    client: reqwest::Client,
}

impl JsonRpcClient {
    /// Client whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Malformed(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &NodeEndpoint,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        trace!(node = %endpoint.node, method, "rpc request");

        let response = self
            .client
            .post(&endpoint.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        check_http_status(response.status())?;
        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Malformed(format!("{method}: {e}")))?;
        decode_result(method, body)
    }
}

/// A 5xx means the node is not serving yet; other non-2xx answers are refusals
fn check_http_status(status: reqwest::StatusCode) -> Result<(), RpcError> {
    if status.is_server_error() {
        return Err(RpcError::Unreachable(format!("HTTP {status}")));
    }
    if !status.is_success() {
        return Err(RpcError::Rejected {
            code: i64::from(status.as_u16()),
            message: format!("HTTP {status}"),
        });
    }
    Ok(())
}

fn decode_result<T: DeserializeOwned>(method: &str, body: JsonRpcResponse) -> Result<T, RpcError> {
    if let Some(error) = body.error {
        return Err(RpcError::Rejected {
            code: error.code,
            message: error.message,
        });
    }
    let result = body
        .result
        .ok_or_else(|| RpcError::Malformed(format!("{method}: missing result")))?;
    serde_json::from_value(result).map_err(|e| RpcError::Malformed(format!("{method}: {e}")))
}

impl From<BlockEnvelope> for BlockSummary {
    fn from(envelope: BlockEnvelope) -> Self {
        Self {
            hash: envelope.block.hash,
            height: envelope.block.header.height,
            era_id: envelope.block.header.era_id,
            state_root_hash: envelope.block.header.state_root_hash,
        }
    }
}

fn transport_error(err: reqwest::Error) -> RpcError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        RpcError::Unreachable(err.to_string())
    } else {
        RpcError::Malformed(err.to_string())
    }
}

#[async_trait]
impl NodeRpc for JsonRpcClient {
    async fn get_status(&self, endpoint: &NodeEndpoint) -> Result<NodeStatus, RpcError> {
        self.call(endpoint, "info_get_status", json!([])).await
    }

    async fn get_block(
        &self,
        endpoint: &NodeEndpoint,
        height: Option<u64>,
    ) -> Result<BlockSummary, RpcError> {
        let params = match height {
            Some(height) => json!({ "block_identifier": { "Height": height } }),
            None => json!([]),
        };
        let envelope: BlockEnvelope = self.call(endpoint, "chain_get_block", params).await?;
        Ok(envelope.into())
    }

    async fn get_era_summary(&self, endpoint: &NodeEndpoint) -> Result<EraSummary, RpcError> {
        let envelope: EraSummaryEnvelope =
            self.call(endpoint, "chain_get_era_summary", json!([])).await?;
        Ok(envelope.era_summary)
    }

    async fn get_metrics(&self, endpoint: &NodeEndpoint) -> Result<NodeMetrics, RpcError> {
        let response = self
            .client
            .get(&endpoint.metrics_url)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(RpcError::Unreachable(format!("HTTP {}", response.status())));
        }
        let text = response
            .text()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        Ok(NodeMetrics::parse_prometheus(&text))
    }

    async fn submit_bid(
        &self,
        endpoint: &NodeEndpoint,
        bid: &BidRequest,
    ) -> Result<BondingReceipt, RpcError> {
        let params = serde_json::to_value(bid).map_err(|e| RpcError::Malformed(e.to_string()))?;
        self.call(endpoint, "add_bid", params).await
    }

    async fn withdraw_bid(
        &self,
        endpoint: &NodeEndpoint,
        withdrawal: &WithdrawBidRequest,
    ) -> Result<BondingReceipt, RpcError> {
        let params =
            serde_json::to_value(withdrawal).map_err(|e| RpcError::Malformed(e.to_string()))?;
        self.call(endpoint, "withdraw_bid", params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devnet_core::NodeId;

    #[test]
    fn test_request_shape() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "info_get_status",
            params: json!([]),
        };
        let text = serde_json::to_string(&request).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":1,"method":"info_get_status","params":[]}"#);
    }

    fn response(body: Value) -> JsonRpcResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_block_envelope_decodes() {
        let body = response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "api_version": "1.0.0",
                "block": {
                    "hash": "aa",
                    "header": { "height": 42, "era_id": 4, "state_root_hash": "bb", "timestamp": "x" },
                    "body": {}
                }
            }
        }));
        let envelope: BlockEnvelope = decode_result("chain_get_block", body).unwrap();
        let block = BlockSummary::from(envelope);
        assert_eq!(block.hash, "aa");
        assert_eq!((block.height, block.era_id), (42, 4));
        assert_eq!(block.state_root_hash, "bb");
    }

    #[test]
    fn test_status_result_decodes() {
        let body = response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "api_version": "1.1.0",
                "chainspec_name": "devnet-1",
                "peers": [
                    { "node_id": "tls:0102", "address": "127.0.0.1:22102" },
                    { "node_id": "tls:0304", "address": "127.0.0.1:22103" }
                ],
                "last_added_block_info": {
                    "hash": "cc",
                    "height": 150,
                    "era_id": 15,
                    "state_root_hash": "dd"
                },
                "next_upgrade": {
                    "activation_point": { "EraId": 20 },
                    "protocol_version": "1.2.0"
                }
            }
        }));
        let status: NodeStatus = decode_result("info_get_status", body).unwrap();
        assert_eq!(status.api_version, "1.1.0");
        assert_eq!(status.peers.len(), 2);
        assert_eq!(status.last_added_block_info.map(|b| b.height), Some(150));
        assert_eq!(status.next_upgrade.map(|u| u.protocol_version).as_deref(), Some("1.2.0"));
    }

    #[test]
    fn test_status_before_genesis_decodes() {
        let body = response(json!({ "jsonrpc": "2.0", "id": 1, "result": { "api_version": "1.0.0" } }));
        let status: NodeStatus = decode_result("info_get_status", body).unwrap();
        assert!(status.peers.is_empty());
        assert!(status.last_added_block_info.is_none());
    }

    #[test]
    fn test_error_object_is_a_rejection() {
        let body = response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32601, "message": "Method not found" }
        }));
        let err = decode_result::<NodeStatus>("add_bid", body).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Rejected { code: -32601, ref message } if message == "Method not found"
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_missing_or_mistyped_result_is_malformed() {
        let missing = response(json!({ "jsonrpc": "2.0", "id": 1 }));
        let err = decode_result::<NodeStatus>("info_get_status", missing).unwrap_err();
        assert!(matches!(err, RpcError::Malformed(ref m) if m.contains("missing result")));

        let mistyped = response(json!({ "jsonrpc": "2.0", "id": 1, "result": { "api_version": 7 } }));
        let err = decode_result::<NodeStatus>("info_get_status", mistyped).unwrap_err();
        assert!(matches!(err, RpcError::Malformed(ref m) if m.starts_with("info_get_status")));
    }

    #[test]
    fn test_http_status_classification() {
        use reqwest::StatusCode;

        assert!(check_http_status(StatusCode::OK).is_ok());
        let unavailable = check_http_status(StatusCode::SERVICE_UNAVAILABLE).unwrap_err();
        assert!(unavailable.is_transient());
        let not_found = check_http_status(StatusCode::NOT_FOUND).unwrap_err();
        assert!(matches!(not_found, RpcError::Rejected { code: 404, .. }));
        assert!(!not_found.is_transient());
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        // Bind then drop to find a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let endpoint = NodeEndpoint {
            node: NodeId::new(1),
            rpc_url: format!("http://127.0.0.1:{port}/rpc"),
            metrics_url: format!("http://127.0.0.1:{port}/metrics"),
        };
        let client = JsonRpcClient::new(Duration::from_millis(500)).unwrap();
        let err = client.get_status(&endpoint).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
