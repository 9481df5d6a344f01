//! Shared monitor plumbing
//!
//! This module contains the helpers both monitors lean on: decimal/raw unit
//! conversion, acceptance windows, historical block estimation, and the
//! terminal record updates (expired / error / confirmed bookkeeping).

use anyhow::Result;
use tracing::error;

use crate::store::{unix_now, PaymentStatus, PaymentStore};

// ============================================================================
// NATIVE SYMBOLS
// ============================================================================

/// Symbols paid as native chain value rather than an ERC-20 transfer.
const NATIVE_SYMBOLS: [&str; 5] = ["ETH", "MATIC", "AVAX", "BNB", "SOL"];

/// Whether a token symbol settles as native chain value.
pub fn is_native_symbol(symbol: &str) -> bool {
    NATIVE_SYMBOLS
        .iter()
        .any(|native| native.eq_ignore_ascii_case(symbol))
}

// ============================================================================
// UNIT CONVERSION
// ============================================================================

/// Parses a decimal token amount into raw units.
///
/// String-based so `100.60` at 6 decimals is exactly `100600000`; no float
/// passes through. Fractional digits beyond `decimals` are rejected.
pub fn parse_units(amount: &str, decimals: u8) -> Result<u128> {
    let amount = amount.trim();
    let (integer, fraction) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };
    if integer.is_empty() && fraction.is_empty() {
        anyhow::bail!("Empty amount");
    }
    if !integer.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        anyhow::bail!("Invalid decimal amount '{}'", amount);
    }
    if fraction.len() > decimals as usize {
        anyhow::bail!(
            "Amount '{}' has more than {} fractional digits",
            amount,
            decimals
        );
    }

    let scale = 10u128.pow(decimals as u32);
    let integer_part: u128 = if integer.is_empty() {
        0
    } else {
        integer.parse()?
    };
    let padded = format!("{:0<width$}", fraction, width = decimals as usize);
    let fraction_part: u128 = if padded.is_empty() { 0 } else { padded.parse()? };

    integer_part
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction_part))
        .ok_or_else(|| anyhow::anyhow!("Amount '{}' overflows", amount))
}

/// Formats raw units back to a decimal string with at least two fractional
/// digits (`100600000` at 6 decimals renders as `"100.60"`).
pub fn format_units(raw: u128, decimals: u8) -> String {
    let scale = 10u128.pow(decimals as u32);
    let integer = raw / scale;
    let fraction = raw % scale;
    let mut fraction_str = format!("{:0>width$}", fraction, width = decimals as usize);
    while fraction_str.len() > 2 && fraction_str.ends_with('0') {
        fraction_str.pop();
    }
    if fraction_str.is_empty() {
        format!("{}", integer)
    } else {
        format!("{}.{}", integer, fraction_str)
    }
}

/// Renders an f64 request amount as a decimal string for unit parsing.
pub fn amount_to_decimal_string(amount: f64) -> String {
    let mut rendered = format!("{:.6}", amount);
    while rendered.ends_with('0') {
        rendered.pop();
    }
    if rendered.ends_with('.') {
        rendered.pop();
    }
    rendered
}

// ============================================================================
// ACCEPTANCE WINDOWS
// ============================================================================

/// Lower bound of an acceptance window: 99% of the expected raw amount.
pub fn min_accepted(expected: u128) -> u128 {
    expected / 100 * 99 + (expected % 100) * 99 / 100
}

/// Upper bound for direct payments: 110% of the expected raw amount.
pub fn max_accepted_direct(expected: u128) -> u128 {
    expected / 100 * 110 + (expected % 100) * 110 / 100
}

/// Upper bound for bridge fills: 101% of the expected raw amount.
pub fn max_accepted_fill(expected: u128) -> u128 {
    expected / 100 * 101 + (expected % 100) * 101 / 100
}

// ============================================================================
// BLOCK MATH
// ============================================================================

/// Estimates the first block of a historical scan window.
///
/// Rounds the record's creation time to a block height using the chain's
/// block time, adds a small margin, and clamps the look-back to the chain's
/// configured bound.
pub fn estimate_start_block(
    current_block: u64,
    created_at: u64,
    block_time_seconds: u64,
    lookback_cap: u64,
) -> u64 {
    let elapsed = unix_now().saturating_sub(created_at);
    let block_time = block_time_seconds.max(1);
    // +10 blocks of margin against clock and block-time skew
    let blocks_ago = (elapsed / block_time + 10).min(lookback_cap);
    current_block.saturating_sub(blocks_ago)
}

// ============================================================================
// TERMINAL RECORD UPDATES
// ============================================================================

/// Marks a record expired, recording the expiry time.
pub fn mark_expired(store: &PaymentStore, payment_id: &str) -> PaymentStatus {
    let result = store.transition(payment_id, PaymentStatus::Expired, |record| {
        record.expired_at = Some(unix_now());
    });
    if let Err(e) = result {
        error!("Failed to mark payment {} expired: {}", payment_id, e);
    }
    PaymentStatus::Expired
}

/// Marks a record failed.
pub fn mark_error(store: &PaymentStore, payment_id: &str, reason: &str) -> PaymentStatus {
    error!("Payment {} failed: {}", payment_id, reason);
    let result = store.transition(payment_id, PaymentStatus::Error, |_| {});
    if let Err(e) = result {
        error!("Failed to mark payment {} errored: {}", payment_id, e);
    }
    PaymentStatus::Error
}

/// A transfer candidate located by a monitor, pending confirmations.
#[derive(Debug, Clone)]
pub struct SettlementCandidate {
    /// Transaction hash on the settlement chain
    pub tx_hash: String,
    /// Block the transaction landed in
    pub block_number: u64,
}
