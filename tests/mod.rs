//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    build_test_config, fill_log, mount_eth_block_number, mount_eth_get_logs,
    mount_solana_balance, mount_solana_send_path, sample_policy_text, transfer_log, write_policy,
    DUMMY_BUSINESS_WALLET, DUMMY_OUTPUT_TOKEN_ARB, DUMMY_SPOKE_POOL_ARB, DUMMY_SPOKE_POOL_POLY,
    DUMMY_SPOKE_POOL_SOL, DUMMY_USDC_MINT_SOL, DUMMY_USDC_POLYGON, SOLANA_ACROSS_CHAIN_ID,
    WALLET_KEY_HEX,
};
