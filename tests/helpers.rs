//! Shared test helpers for integration tests
//!
//! This module provides helper functions used by the integration tests:
//! configuration builders, the canonical policy document, raw-log builders,
//! and wiremock mounts for the EVM and Solana JSON-RPC methods the
//! monitors call.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::path::Path;

use railclaw::across::filled_relay_topic0;
use railclaw::config::{
    ApiConfig, BridgeConfig, ChainTuning, Config, EncryptionConfig, MonitoringConfig,
    PaymentConfig, SolConfig,
};
use railclaw::evm_client::{erc20_transfer_topic, pad_topic_address};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Business settlement wallet (EVM, 20 bytes)
pub const DUMMY_BUSINESS_WALLET: &str = "0x6b7d9a084f0c8a93b8f5e9adbd9b1c4e5f6a7b8c";

/// USDC token address on the polygon test chain
pub const DUMMY_USDC_POLYGON: &str = "0x3c499c542cef5e3811e1192ce70d8cc03d5c3359";

/// USDC token address on the arbitrum test chain
pub const DUMMY_OUTPUT_TOKEN_ARB: &str = "0xaf88d065e77c8cc2239327c5edb3a432268e5831";

/// USDC mint on Solana
pub const DUMMY_USDC_MINT_SOL: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// SpokePool contract on the polygon test chain
pub const DUMMY_SPOKE_POOL_POLY: &str = "0x9295ee1d8c5b022be115a2ad3c30c72e34e7f096";

/// SpokePool contract on the arbitrum test chain
pub const DUMMY_SPOKE_POOL_ARB: &str = "0xe35e9842fceaca96570b734083f4a58e8f7c5f2a";

/// SpokePool program id on Solana
pub const DUMMY_SPOKE_POOL_SOL: &str = "US517G5965aydkZ46HS38QLi7UQiSojurfbQfKCELFx";

/// Across network id assigned to Solana
pub const SOLANA_ACROSS_CHAIN_ID: u64 = 34_268_394_551_451;

/// Keystore sealing key, 32 bytes of hex
pub const WALLET_KEY_HEX: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Recent blockhash served by the Solana mock (base58 of 32 bytes)
pub const DUMMY_BLOCKHASH: &str = "4vJ9JU1bJJE96FWSJKvHsmmFADCg4gpZQff4P3bkLKi";

/// Transaction signature served by the Solana mock (base58 of 64 bytes)
pub const DUMMY_TX_SIGNATURE: &str =
    "3L3RY5sT8K4kyEnqhizwaqxLEbcYvpGrGPNEYRwtbCSUtL6YL86jdrvCbohnP5q8VxQ3qzGmt3W3iQJW97rD7m3";

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

/// Builds a service configuration pointing every chain at the given mock
/// endpoints, with fast polling and short deadlines for tests.
pub fn build_test_config(
    evm_url: &str,
    solana_url: &str,
    data_dir: &Path,
    policy_path: &Path,
) -> Config {
    let mut rpc = std::collections::HashMap::new();
    rpc.insert("polygon".to_string(), evm_url.to_string());
    rpc.insert("arbitrum".to_string(), evm_url.to_string());
    rpc.insert("solana".to_string(), solana_url.to_string());

    let mut tokens = std::collections::HashMap::new();
    let mut polygon_tokens = std::collections::HashMap::new();
    polygon_tokens.insert("USDC".to_string(), DUMMY_USDC_POLYGON.to_string());
    tokens.insert("polygon".to_string(), polygon_tokens);
    let mut arbitrum_tokens = std::collections::HashMap::new();
    arbitrum_tokens.insert("USDC".to_string(), DUMMY_OUTPUT_TOKEN_ARB.to_string());
    tokens.insert("arbitrum".to_string(), arbitrum_tokens);
    let mut solana_tokens = std::collections::HashMap::new();
    solana_tokens.insert("USDC".to_string(), DUMMY_USDC_MINT_SOL.to_string());
    tokens.insert("solana".to_string(), solana_tokens);

    let mut spoke_pools = std::collections::HashMap::new();
    spoke_pools.insert("polygon".to_string(), DUMMY_SPOKE_POOL_POLY.to_string());
    spoke_pools.insert("arbitrum".to_string(), DUMMY_SPOKE_POOL_ARB.to_string());
    spoke_pools.insert("solana".to_string(), DUMMY_SPOKE_POOL_SOL.to_string());

    let mut across_chain_ids = std::collections::HashMap::new();
    across_chain_ids.insert("arbitrum".to_string(), 42_161);
    across_chain_ids.insert("polygon".to_string(), 137);
    across_chain_ids.insert("solana".to_string(), SOLANA_ACROSS_CHAIN_ID);

    let mut chains = std::collections::HashMap::new();
    chains.insert(
        "polygon".to_string(),
        ChainTuning {
            block_time_seconds: 2,
            lookback_blocks: 30,
        },
    );
    chains.insert(
        "arbitrum".to_string(),
        ChainTuning {
            block_time_seconds: 1,
            lookback_blocks: 30,
        },
    );

    Config {
        data_dir: data_dir.to_path_buf(),
        policy_path: policy_path.to_path_buf(),
        rpc,
        tokens,
        bridge: BridgeConfig {
            spoke_pools,
            across_chain_ids,
            estimated_relay_fee_pct: 0.006,
            min_relay_fee_buffer: "0.10".to_string(),
            fill_deadline_offset_sec: 21_600,
            fill_lookback_blocks: 20,
        },
        monitoring: MonitoringConfig {
            poll_interval_ms: 100,
            required_confirmations: 3,
            timeout_ms: 3_000,
            bridge_timeout_ms: 5_000,
        },
        encryption: EncryptionConfig {
            wallet_key: WALLET_KEY_HEX.to_string(),
        },
        payment: PaymentConfig {
            base_url: "https://pay.example.com".to_string(),
            default_expiry_hours: 24,
        },
        sol: SolConfig {
            dispenser_key: None,
            fund_amount_lamports: 2_000_000,
        },
        chains,
        api: ApiConfig::default(),
    }
}

// ============================================================================
// POLICY DOCUMENT
// ============================================================================

/// Canonical policy document used by the tests. Individual tests derive
/// variants with `str::replace`.
pub fn sample_policy_text() -> String {
    r#"---
version: 3
status: active
updated_at: "2026-07-30T12:00:00Z"
---
business:
  id: biz_123
  name: Acme Imports
  wallet: "0x6b7d9a084f0c8a93b8f5e9adbd9b1c4e5f6a7b8c"
  onboarded: true
  chat_id: "784512"
specification:
  allowed_chains: [polygon, arbitrum]
  allowed_tokens: [USDC]
restrictions:
  max_single_payment: 10000
operational:
  emi_enabled: false
  emi_premium_percent: 0
cross_chain:
  user_payable_chains: [solana]
  bridge:
    enabled: true
    provider: across
    settlement_chain: arbitrum
"#
    .to_string()
}

/// Writes a policy document to the given path.
pub fn write_policy(path: &Path, text: &str) {
    std::fs::write(path, text).expect("write policy document");
}

// ============================================================================
// RAW LOG BUILDERS
// ============================================================================

/// Builds an ERC-20 Transfer log as raw JSON-RPC output.
pub fn transfer_log(token: &str, from: &str, to: &str, value: u128, block: u64) -> serde_json::Value {
    json!({
        "address": token,
        "topics": [
            erc20_transfer_topic(),
            pad_topic_address(from),
            pad_topic_address(to),
        ],
        "data": format!("0x{:064x}", value),
        "blockNumber": format!("0x{:x}", block),
        "transactionHash": "0xdeadbeefcafe",
        "logIndex": "0x0"
    })
}

/// Builds a `FilledRelay` log as raw JSON-RPC output.
pub fn fill_log(
    origin_chain_id: u64,
    output_token: &str,
    output_amount: u128,
    recipient: &str,
    block: u64,
) -> serde_json::Value {
    let zero_word = "0".repeat(64);
    let pad = |addr: &str| format!("{:0>64}", addr.trim_start_matches("0x"));

    let mut data = String::new();
    data.push_str(&zero_word); // inputToken
    data.push_str(&pad(output_token)); // outputToken
    data.push_str(&zero_word); // inputAmount
    data.push_str(&format!("{:064x}", output_amount)); // outputAmount
    data.push_str(&zero_word); // repaymentChainId
    data.push_str(&zero_word); // fillDeadline
    data.push_str(&zero_word); // exclusivityDeadline
    data.push_str(&zero_word); // exclusiveRelayer
    data.push_str(&zero_word); // depositor
    data.push_str(&pad(recipient)); // recipient
    data.push_str(&zero_word); // messageHash
    for _ in 0..4 {
        data.push_str(&zero_word); // relayExecutionInfo tuple
    }

    json!({
        "address": DUMMY_SPOKE_POOL_ARB,
        "topics": [
            filled_relay_topic0(),
            format!("0x{:064x}", origin_chain_id),
            format!("0x{:064x}", 42u64),
            format!("0x{}", "0".repeat(64)),
        ],
        "data": format!("0x{}", data),
        "blockNumber": format!("0x{:x}", block),
        "transactionHash": "0xf111edbeef",
        "logIndex": "0x0"
    })
}

// ============================================================================
// MOCK SERVER MOUNTS
// ============================================================================

/// Mounts an `eth_blockNumber` mock returning the given height.
pub async fn mount_eth_block_number(server: &MockServer, block: u64) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_blockNumber"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": format!("0x{:x}", block)
        })))
        .mount(server)
        .await;
}

/// Mounts a catch-all `eth_getLogs` mock returning the given logs.
pub async fn mount_eth_get_logs(server: &MockServer, logs: serde_json::Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getLogs"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": logs
        })))
        .mount(server)
        .await;
}

/// Mounts a `getTokenAccountBalance` mock returning the given balance.
pub async fn mount_solana_balance(server: &MockServer, amount: u64, decimals: u8) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "getTokenAccountBalance"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "context": { "slot": 1 },
                "value": {
                    "amount": amount.to_string(),
                    "decimals": decimals,
                    "uiAmount": null,
                    "uiAmountString": amount.to_string()
                }
            }
        })))
        .mount(server)
        .await;
}

/// Mounts the Solana transaction path: `getLatestBlockhash`,
/// `sendTransaction`, and an immediately-confirmed `getSignatureStatuses`.
pub async fn mount_solana_send_path(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "getLatestBlockhash"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "context": { "slot": 1 },
                "value": {
                    "blockhash": DUMMY_BLOCKHASH,
                    "lastValidBlockHeight": 1000
                }
            }
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "sendTransaction"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": DUMMY_TX_SIGNATURE
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "getSignatureStatuses"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "context": { "slot": 1 },
                "value": [{
                    "slot": 1,
                    "confirmations": 10,
                    "confirmationStatus": "confirmed",
                    "err": null
                }]
            }
        })))
        .mount(server)
        .await;
}
