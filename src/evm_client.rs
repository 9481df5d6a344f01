//! EVM Client Module
//!
//! This module provides a client for communicating with EVM-compatible
//! blockchain nodes via their JSON-RPC API. It handles block queries, event
//! log scanning (with the provider-friendly chunking the monitors rely on),
//! transaction receipts, ERC-20 metadata calls, and an optional WebSocket
//! push subscription for new logs.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Maximum block span of a single `eth_getLogs` request.
///
/// Public RPC endpoints rate-limit wide log scans aggressively; every scan
/// in this crate goes through [`EvmClient::get_logs_chunked`] which holds
/// ranges to this span.
pub const LOG_CHUNK_BLOCKS: u64 = 10;

/// Pause between log chunks, keeps scans under provider rate limits.
const CHUNK_PAUSE_MS: u64 = 100;

/// Retries for a transient failure on a single chunk.
const CHUNK_RETRIES: u32 = 3;

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// EVM event log entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    /// Block number (JSON-RPC uses camelCase: blockNumber)
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    /// Transaction hash (JSON-RPC uses camelCase: transactionHash)
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
}

/// A transaction as embedded in an `eth_getBlockByNumber` response
#[derive(Debug, Clone, Deserialize)]
pub struct EvmBlockTx {
    /// Transaction hash
    pub hash: String,
    /// Recipient; absent for contract creation
    pub to: Option<String>,
    /// Native value transferred, hex wei
    pub value: String,
}

/// A block with full transaction bodies
#[derive(Debug, Clone, Deserialize)]
pub struct EvmBlock {
    /// Block number, hex
    pub number: String,
    /// Full transaction objects
    #[serde(default)]
    pub transactions: Vec<EvmBlockTx>,
}

/// Transaction receipt fields the monitors need
#[derive(Debug, Clone, Deserialize)]
pub struct EvmReceipt {
    /// Execution status ("0x1" success, "0x0" reverted)
    pub status: Option<String>,
    /// Block the transaction landed in, hex
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
}

/// A decoded ERC-20 Transfer event
#[derive(Debug, Clone, PartialEq)]
pub struct Erc20Transfer {
    /// Sender address, lowercase 0x hex
    pub from: String,
    /// Recipient address, lowercase 0x hex
    pub to: String,
    /// Transferred value in raw token units
    pub value: u128,
    /// Emitting token contract, lowercase 0x hex
    pub token: String,
    /// Block the transfer landed in
    pub block_number: u64,
    /// Transaction hash
    pub transaction_hash: String,
}

// ============================================================================
// EVM CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with EVM-compatible blockchain nodes via JSON-RPC.
///
/// Cheap to clone; safe to share between monitors.
#[derive(Debug, Clone)]
pub struct EvmClient {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the EVM node (e.g., "https://polygon-rpc.com")
    base_url: String,
}

impl EvmClient {
    /// Creates a new EVM client for the given node URL.
    ///
    /// # Arguments
    ///
    /// * `node_url` - Base URL of the EVM node
    ///
    /// # Returns
    ///
    /// * `Ok(EvmClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create client
    pub fn new(node_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: node_url.to_string(),
        })
    }

    /// Returns the base URL of this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends one JSON-RPC request and decodes the result.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response: JsonRpcResponse<T> = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, self.base_url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", method, self.base_url))?;

        if let Some(error) = response.error {
            return Err(anyhow::anyhow!(
                "JSON-RPC error from {}: {} (code: {})",
                self.base_url,
                error.message,
                error.code
            ));
        }

        Ok(response.result)
    }

    /// Gets the current block number.
    pub async fn get_block_number(&self) -> Result<u64> {
        let result: Option<String> = self.call("eth_blockNumber", serde_json::json!([])).await?;
        let block_number_hex =
            result.ok_or_else(|| anyhow::anyhow!("No result in eth_blockNumber response"))?;
        hex_to_u64(&block_number_hex).context("Failed to parse block number")
    }

    /// Queries event logs for a single block range.
    ///
    /// Callers scanning history should use [`get_logs_chunked`] instead; this
    /// method sends the range as-is.
    ///
    /// # Arguments
    ///
    /// * `address` - Emitting contract, or `None` for any
    /// * `topics` - Topic filter; `None` entries match anything
    /// * `from_block` / `to_block` - Inclusive block range
    pub async fn get_logs(
        &self,
        address: Option<&str>,
        topics: &[Option<String>],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EvmLog>> {
        let mut filter = serde_json::json!({
            "topics": topics,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });
        if let Some(address) = address {
            filter["address"] = serde_json::json!(address);
        }

        let result: Option<Vec<EvmLog>> = self.call("eth_getLogs", serde_json::json!([filter])).await?;
        Ok(result.unwrap_or_default())
    }

    /// Scans `[from_block, to_block]` for logs in chunks of at most
    /// [`LOG_CHUNK_BLOCKS`] blocks, pausing briefly between chunks.
    ///
    /// A transient failure on one chunk is retried a few times and then
    /// skipped; later chunks are always attempted, so one bad range never
    /// hides the rest of the window.
    pub async fn get_logs_chunked(
        &self,
        address: Option<&str>,
        topics: &[Option<String>],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EvmLog>> {
        let mut logs = Vec::new();
        let mut chunk_start = from_block;

        while chunk_start <= to_block {
            let chunk_end = (chunk_start + LOG_CHUNK_BLOCKS - 1).min(to_block);

            let mut attempt = 0;
            loop {
                match self.get_logs(address, topics, chunk_start, chunk_end).await {
                    Ok(mut chunk_logs) => {
                        logs.append(&mut chunk_logs);
                        break;
                    }
                    Err(e) if attempt + 1 < CHUNK_RETRIES => {
                        attempt += 1;
                        debug!(
                            "Retrying log chunk [{}, {}] after error (attempt {}): {}",
                            chunk_start, chunk_end, attempt, e
                        );
                        tokio::time::sleep(Duration::from_millis(CHUNK_PAUSE_MS * 2)).await;
                    }
                    Err(e) => {
                        warn!(
                            "Skipping log chunk [{}, {}] after {} attempts: {}",
                            chunk_start, chunk_end, CHUNK_RETRIES, e
                        );
                        break;
                    }
                }
            }

            chunk_start = chunk_end + 1;
            if chunk_start <= to_block {
                tokio::time::sleep(Duration::from_millis(CHUNK_PAUSE_MS)).await;
            }
        }

        Ok(logs)
    }

    /// Queries a transaction receipt by hash.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(EvmReceipt))` - Receipt found
    /// * `Ok(None)` - Transaction pending or unknown
    pub async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<EvmReceipt>> {
        let hash = normalize_hex_prefix(hash);
        self.call("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await
    }

    /// Fetches a block with full transaction bodies.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - Block not produced yet
    pub async fn get_block_with_txs(&self, number: u64) -> Result<Option<EvmBlock>> {
        self.call(
            "eth_getBlockByNumber",
            serde_json::json!([format!("0x{:x}", number), true]),
        )
        .await
    }

    /// Reads a token's `decimals()` via `eth_call`.
    ///
    /// Falls back to 6 (the USDC class) on any failure; the amount-matching
    /// window makes a wrong guess fail closed rather than over-match.
    pub async fn get_token_decimals(&self, token: &str) -> u8 {
        // decimals() selector
        let call = serde_json::json!([{ "to": token, "data": "0x313ce567" }, "latest"]);
        match self.call::<String>("eth_call", call).await {
            Ok(Some(result)) => {
                let stripped = result.strip_prefix("0x").unwrap_or(&result);
                u8::from_str_radix(&stripped[stripped.len().saturating_sub(2)..], 16).unwrap_or(6)
            }
            Ok(None) | Err(_) => {
                debug!("decimals() call failed for {}, assuming 6", token);
                6
            }
        }
    }

    /// Opens a push subscription for logs matching the filter.
    ///
    /// Upgrades the RPC URL to its WebSocket form and issues
    /// `eth_subscribe("logs", …)`. Matching logs arrive on the returned
    /// channel; any transport failure silently closes it, and the caller
    /// falls back to polling. Endpoints without WebSocket support fail here
    /// immediately, which callers also treat as "poll instead".
    pub async fn subscribe_logs(
        &self,
        address: Option<&str>,
        topics: &[Option<String>],
    ) -> Result<mpsc::Receiver<EvmLog>> {
        let ws_url = websocket_url(&self.base_url);
        let (mut ws, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("Failed to open WebSocket to {}", ws_url))?;

        let mut filter = serde_json::json!({ "topics": topics });
        if let Some(address) = address {
            filter["address"] = serde_json::json!(address);
        }
        let subscribe = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["logs", filter],
        });
        ws.send(tokio_tungstenite::tungstenite::Message::Text(
            subscribe.to_string().into(),
        ))
        .await
        .context("Failed to send eth_subscribe")?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(message) = ws.next().await {
                let text = match message {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => text,
                    Ok(tokio_tungstenite::tungstenite::Message::Ping(_)) => continue,
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                // Subscription pushes carry the log under params.result
                let Some(result) = value.pointer("/params/result") else {
                    continue;
                };
                if let Ok(log) = serde_json::from_value::<EvmLog>(result.clone()) {
                    if tx.send(log).await.is_err() {
                        break;
                    }
                }
            }
            // Sender drops here; the receiver observes the closed channel
        });

        Ok(rx)
    }
}

// ============================================================================
// EVENT DECODING
// ============================================================================

/// Keccak-256 of a string, 0x-prefixed hex.
pub fn keccak_topic(signature: &str) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Topic 0 of `Transfer(address indexed from, address indexed to, uint256 value)`.
pub fn erc20_transfer_topic() -> String {
    keccak_topic("Transfer(address,address,uint256)")
}

/// Left-pads an EVM address to a 32-byte topic value.
pub fn pad_topic_address(address: &str) -> String {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    format!("0x{:0>64}", stripped.to_lowercase())
}

/// Extracts the address packed into the last 20 bytes of a 32-byte word.
pub fn topic_to_address(topic: &str) -> Option<String> {
    let stripped = topic.strip_prefix("0x").unwrap_or(topic);
    if stripped.len() != 64 {
        return None;
    }
    Some(format!("0x{}", stripped[24..].to_lowercase()))
}

/// Decodes an ERC-20 Transfer log.
///
/// # Returns
///
/// * `Some(Erc20Transfer)` - Log is a well-formed Transfer
/// * `None` - Wrong topic count or unparseable fields
pub fn parse_erc20_transfer(log: &EvmLog) -> Option<Erc20Transfer> {
    if log.topics.len() != 3 {
        return None;
    }
    let from = topic_to_address(&log.topics[1])?;
    let to = topic_to_address(&log.topics[2])?;
    let value = hex_to_u128(&log.data)?;
    let block_number = hex_to_u64(&log.block_number).ok()?;
    Some(Erc20Transfer {
        from,
        to,
        value,
        token: log.address.to_lowercase(),
        block_number,
        transaction_hash: log.transaction_hash.clone(),
    })
}

// ============================================================================
// HEX HELPERS
// ============================================================================

/// Parses a 0x-prefixed hex quantity into u64.
pub fn hex_to_u64(value: &str) -> Result<u64> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(stripped, 16).with_context(|| format!("Invalid hex quantity '{}'", value))
}

/// Parses a 0x-prefixed hex quantity into u128.
///
/// Returns `None` for values that do not fit; amounts beyond u128 are far
/// outside any token supply this service handles.
pub fn hex_to_u128(value: &str) -> Option<u128> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let trimmed = stripped.trim_start_matches('0');
    if trimmed.len() > 32 {
        return None;
    }
    if trimmed.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(trimmed, 16).ok()
}

fn normalize_hex_prefix(hash: &str) -> String {
    if hash.starts_with("0x") {
        hash.to_string()
    } else {
        format!("0x{}", hash)
    }
}

/// Converts an HTTP RPC URL to its WebSocket form.
fn websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}
