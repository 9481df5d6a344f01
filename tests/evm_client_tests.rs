//! EVM client tests against a mock JSON-RPC endpoint
//!
//! These tests verify request shaping, chunked log scanning, and the
//! degraded paths (transient chunk failures, missing `decimals()`).

use railclaw::evm_client::{erc20_transfer_topic, pad_topic_address, EvmClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{mount_eth_block_number, transfer_log, DUMMY_BUSINESS_WALLET, DUMMY_USDC_POLYGON};

// ============================================================================
// BASIC QUERIES
// ============================================================================

/// Test block number parsing from the hex quantity
#[tokio::test]
async fn test_get_block_number() {
    let server = MockServer::start().await;
    mount_eth_block_number(&server, 1000).await;

    let client = EvmClient::new(&server.uri()).expect("create client");
    assert_eq!(client.get_block_number().await.unwrap(), 1000);
}

/// Test receipt lookup for a pending transaction
#[tokio::test]
async fn test_get_receipt_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getTransactionReceipt"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": null
        })))
        .mount(&server)
        .await;

    let client = EvmClient::new(&server.uri()).expect("create client");
    let receipt = client.get_transaction_receipt("0xabc").await.unwrap();
    assert!(receipt.is_none());
}

/// Test that decimals() failures fall back to 6
/// Why: tokens without metadata must not kill the monitor
#[tokio::test]
async fn test_decimals_defaults_on_failure() {
    let server = MockServer::start().await;
    // No eth_call mock mounted: the endpoint answers 404

    let client = EvmClient::new(&server.uri()).expect("create client");
    assert_eq!(client.get_token_decimals(DUMMY_USDC_POLYGON).await, 6);
}

/// Test decimals() decoding of a successful call
#[tokio::test]
async fn test_decimals_reads_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_call"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": format!("0x{:064x}", 18)
        })))
        .mount(&server)
        .await;

    let client = EvmClient::new(&server.uri()).expect("create client");
    assert_eq!(client.get_token_decimals(DUMMY_USDC_POLYGON).await, 18);
}

// ============================================================================
// CHUNKED LOG SCANNING
// ============================================================================

/// Test that a scan of [0, 34] issues exactly ceil(35/10) = 4 chunk requests
/// Why: provider rate limits hinge on the 10-block ceiling, and every block
/// must be covered exactly once
#[tokio::test]
async fn test_chunked_scan_request_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getLogs"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": []
        })))
        .expect(4)
        .mount(&server)
        .await;

    let client = EvmClient::new(&server.uri()).expect("create client");
    let topics = vec![Some(erc20_transfer_topic())];
    let logs = client
        .get_logs_chunked(Some(DUMMY_USDC_POLYGON), &topics, 0, 34)
        .await
        .unwrap();
    assert!(logs.is_empty());

    server.verify().await;
}

/// Test that a persistently failing chunk does not drop later chunks
/// Why: one bad range must never hide a payment that landed after it
#[tokio::test]
async fn test_chunk_failure_keeps_scanning() {
    let server = MockServer::start().await;

    // The first chunk fails all its retry attempts...
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getLogs"})))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;

    // ...later chunks answer with the transfer we are looking for
    let log = transfer_log(
        DUMMY_USDC_POLYGON,
        "0x1111111111111111111111111111111111111111",
        DUMMY_BUSINESS_WALLET,
        100_000_000,
        15,
    );
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getLogs"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [log]
        })))
        .mount(&server)
        .await;

    let client = EvmClient::new(&server.uri()).expect("create client");
    let topics = vec![
        Some(erc20_transfer_topic()),
        None,
        Some(pad_topic_address(DUMMY_BUSINESS_WALLET)),
    ];
    let logs = client
        .get_logs_chunked(Some(DUMMY_USDC_POLYGON), &topics, 0, 19)
        .await
        .unwrap();

    // The second chunk still delivered its log
    assert!(!logs.is_empty());
    assert_eq!(logs[0].transaction_hash, "0xdeadbeefcafe");
}

/// Test that a JSON-RPC error object surfaces as an error
#[tokio::test]
async fn test_rpc_error_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getLogs"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32005, "message": "query returned more than 10000 results" }
        })))
        .mount(&server)
        .await;

    let client = EvmClient::new(&server.uri()).expect("create client");
    let result = client.get_logs(Some(DUMMY_USDC_POLYGON), &[], 0, 5).await;
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("-32005"));
}
