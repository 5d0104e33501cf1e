// JSON-RPC-over-HTTP client for Hive API nodes. Several endpoints may
// be configured; on failure the client rotates to the next one and the
// caller retries with backoff.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, trace, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use v4vapp_common::config::HIVE_RPC_TIMEOUT;

use super::types::{AccountInfo, Block, DynamicGlobalProperties, VirtualOpEntry};

#[derive(Debug, Error)]
pub enum HiveClientError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Node returned RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Block {0} not available yet")]
    BlockNotAvailable(u64),
    #[error("Unexpected response shape: {0}")]
    Decode(String),
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

pub struct HiveClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    active: AtomicUsize,
}

impl HiveClient {
    pub fn new(endpoints: Vec<String>, timeout: Option<Duration>) -> Result<Self, HiveClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(HIVE_RPC_TIMEOUT))
            .build()?;
        Ok(Self {
            http,
            endpoints,
            active: AtomicUsize::new(0),
        })
    }

    fn endpoint(&self) -> &str {
        let index = self.active.load(Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[index]
    }

    // Rotate to the next configured endpoint after a failure
    pub fn rotate_endpoint(&self) {
        let next = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "Rotating Hive endpoint to {}",
            self.endpoints[next % self.endpoints.len()]
        );
    }

    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, HiveClientError> {
        trace!("hive call: {}", method);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let response: RpcResponse = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(HiveClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = response
            .result
            .ok_or_else(|| HiveClientError::Decode(format!("{}: empty result", method)))?;
        serde_json::from_value(result).map_err(|e| HiveClientError::Decode(e.to_string()))
    }

    pub async fn get_dynamic_global_properties(
        &self,
    ) -> Result<DynamicGlobalProperties, HiveClientError> {
        self.call("database_api.get_dynamic_global_properties", json!({}))
            .await
    }

    // A missing block at the tip is expected (the node has not produced
    // it yet); callers wait and retry
    pub async fn get_block(&self, block_num: u64) -> Result<Block, HiveClientError> {
        #[derive(Deserialize)]
        struct GetBlockResult {
            block: Option<Block>,
        }
        let result: GetBlockResult = self
            .call("block_api.get_block", json!({ "block_num": block_num }))
            .await?;
        result
            .block
            .ok_or(HiveClientError::BlockNotAvailable(block_num))
    }

    // Bulk fetch used for catch-up; the node caps count at 1000
    pub async fn get_block_range(
        &self,
        starting_block_num: u64,
        count: u32,
    ) -> Result<Vec<Block>, HiveClientError> {
        #[derive(Deserialize)]
        struct GetBlockRangeResult {
            blocks: Vec<Block>,
        }
        let result: GetBlockRangeResult = self
            .call(
                "block_api.get_block_range",
                json!({ "starting_block_num": starting_block_num, "count": count }),
            )
            .await?;
        debug!(
            "Fetched {} blocks from {}",
            result.blocks.len(),
            starting_block_num
        );
        Ok(result.blocks)
    }

    // Virtual operations (witness rewards) for one block
    pub async fn get_virtual_ops(
        &self,
        block_num: u64,
    ) -> Result<Vec<VirtualOpEntry>, HiveClientError> {
        #[derive(Deserialize)]
        struct OpsInBlockResult {
            ops: Vec<VirtualOpEntry>,
        }
        let result: OpsInBlockResult = self
            .call(
                "account_history_api.get_ops_in_block",
                json!({ "block_num": block_num, "only_virtual": true }),
            )
            .await?;
        Ok(result.ops)
    }

    // Account lookup, used to read the operator's policy metadata
    pub async fn find_account(&self, name: &str) -> Result<Option<AccountInfo>, HiveClientError> {
        #[derive(Deserialize)]
        struct FindAccountsResult {
            accounts: Vec<AccountInfo>,
        }
        let mut result: FindAccountsResult = self
            .call("database_api.find_accounts", json!({ "accounts": [name] }))
            .await?;
        Ok(if result.accounts.is_empty() {
            None
        } else {
            Some(result.accounts.remove(0))
        })
    }

    // Submit a signed transaction
    pub async fn broadcast_transaction(&self, trx: Value) -> Result<(), HiveClientError> {
        let _: Value = self
            .call("network_broadcast_api.broadcast_transaction", json!({ "trx": trx }))
            .await?;
        Ok(())
    }
}
