//! Direct EVM Payment Monitor
//!
//! Locates the single transfer that pays the settlement wallet the expected
//! amount on the settlement chain, then waits for the required number of
//! confirmations. ERC-20 tokens are watched through `Transfer` logs
//! (historical chunked scan plus a live subscription when the endpoint
//! offers WebSocket push); native symbols are watched by inspecting block
//! transactions.
//!
//! State machine: `pending -> confirming -> confirmed | expired`. Missing
//! configuration (no RPC for the chain, unknown token) is fatal and ends
//! the record in `error`; transient RPC noise is retried until the
//! deadline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::evm_client::{
    erc20_transfer_topic, hex_to_u128, pad_topic_address, parse_erc20_transfer, EvmClient,
};
use crate::monitor::generic::{
    amount_to_decimal_string, estimate_start_block, is_native_symbol, mark_error, mark_expired,
    max_accepted_direct, min_accepted, parse_units, SettlementCandidate,
};
use crate::store::{
    unix_now, Notification, NotificationType, PaymentKind, PaymentStatus, PaymentStore,
};

/// Runs the direct payment monitor to completion.
///
/// # Arguments
///
/// * `config` - Service configuration
/// * `store` - Payment record store
/// * `payment_id` - Record to monitor; must be a `direct` record
///
/// # Returns
///
/// The terminal status the record reached.
pub async fn run_direct_monitor(
    config: Arc<Config>,
    store: PaymentStore,
    payment_id: String,
) -> Result<PaymentStatus> {
    let record = store.get(&payment_id)?;
    if !matches!(record.kind, PaymentKind::Direct) {
        return Ok(mark_error(&store, &payment_id, "record is not a direct payment"));
    }

    let rpc_url = match config.rpc_url(&record.settlement_chain) {
        Ok(url) => url.to_string(),
        Err(e) => return Ok(mark_error(&store, &payment_id, &e.to_string())),
    };
    let client = match EvmClient::new(&rpc_url) {
        Ok(client) => client,
        Err(e) => return Ok(mark_error(&store, &payment_id, &e.to_string())),
    };

    let deadline = Instant::now() + Duration::from_millis(config.monitoring.timeout_ms);
    let poll_interval = Duration::from_millis(config.monitoring.poll_interval_ms);
    let wallet = record.settlement_wallet.to_lowercase();

    info!(
        "Direct monitor started: payment={} chain={} token={} amount={}",
        payment_id, record.settlement_chain, record.token, record.amount
    );

    let candidate = if is_native_symbol(&record.token) {
        find_native_transfer(&config, &client, &record, &wallet, deadline, poll_interval).await
    } else {
        let token_address = match config.token_address(&record.settlement_chain, &record.token) {
            Some(address) => address.to_lowercase(),
            None => {
                return Ok(mark_error(
                    &store,
                    &payment_id,
                    &format!(
                        "no address configured for token {} on {}",
                        record.token, record.settlement_chain
                    ),
                ))
            }
        };
        find_erc20_transfer(
            &config,
            &client,
            &record,
            &wallet,
            &token_address,
            deadline,
            poll_interval,
        )
        .await
    };

    let candidate = match candidate {
        Some(candidate) => candidate,
        None => return Ok(mark_expired(&store, &payment_id)),
    };

    info!(
        "Direct monitor located transfer for {}: tx={} block={}",
        payment_id, candidate.tx_hash, candidate.block_number
    );
    if record.status == PaymentStatus::Pending {
        store.transition(&payment_id, PaymentStatus::Confirming, |r| {
            r.tx_hash = Some(candidate.tx_hash.clone());
        })?;
    } else {
        // Resumed monitor, already confirming: just refresh the located tx
        store.update(&payment_id, |r| {
            r.tx_hash = Some(candidate.tx_hash.clone());
        })?;
    }

    let confirmations = match await_confirmations(
        &client,
        candidate.block_number,
        config.monitoring.required_confirmations,
        deadline,
        poll_interval,
    )
    .await
    {
        Some(confirmations) => confirmations,
        None => return Ok(mark_expired(&store, &payment_id)),
    };

    let confirmed_at = unix_now();
    let record = store.transition(&payment_id, PaymentStatus::Confirmed, |r| {
        r.confirmations = Some(confirmations);
        r.confirmed_at = Some(confirmed_at);
    })?;
    store.enqueue_notification(
        &payment_id,
        &Notification {
            notification_type: NotificationType::DirectConfirmed,
            payment_id: payment_id.clone(),
            business_id: record.business_id.clone(),
            business_name: record.business_name.clone(),
            token: record.token.clone(),
            amount: record.amount,
            settlement_chain: record.settlement_chain.clone(),
            tx_hash: record.tx_hash.clone(),
            deposit_tx_sig: None,
            confirmations: Some(confirmations),
            confirmed_at,
            chat_id: record.chat_id.clone(),
        },
    )?;

    info!("Direct payment {} confirmed after {} confirmations", payment_id, confirmations);
    Ok(PaymentStatus::Confirmed)
}

// ============================================================================
// ERC-20 WATCH
// ============================================================================

/// Watches for a matching ERC-20 Transfer to the wallet.
///
/// Runs a historical chunked scan from the record's creation height, then
/// follows the chain head, preferring a live log subscription when the
/// endpoint supports one. Returns `None` on deadline.
async fn find_erc20_transfer(
    config: &Config,
    client: &EvmClient,
    record: &crate::store::PaymentRecord,
    wallet: &str,
    token_address: &str,
    deadline: Instant,
    poll_interval: Duration,
) -> Option<SettlementCandidate> {
    let decimals = client.get_token_decimals(token_address).await;
    let expected = match parse_units(&amount_to_decimal_string(record.amount), decimals) {
        Ok(expected) => expected,
        Err(e) => {
            warn!("Cannot scale amount for {}: {}", record.payment_id, e);
            return None;
        }
    };
    let min_value = min_accepted(expected);
    let max_value = max_accepted_direct(expected);

    // Fills from the bridge land on the same wallet; their sender is a
    // spoke pool and must never satisfy a direct watcher.
    let spoke_pools: HashSet<String> = config
        .bridge
        .spoke_pools
        .values()
        .map(|address| address.to_lowercase())
        .collect();

    let topics = vec![
        Some(erc20_transfer_topic()),
        None,
        Some(pad_topic_address(wallet)),
    ];

    // Live subscription first so nothing lands between scan and follow
    let mut live = match client.subscribe_logs(Some(token_address), &topics).await {
        Ok(rx) => Some(rx),
        Err(e) => {
            warn!(
                "Log subscription unavailable for {}, polling only: {}",
                record.payment_id, e
            );
            None
        }
    };

    let matches = |transfer: &crate::evm_client::Erc20Transfer| -> bool {
        transfer.to == wallet
            && transfer.value >= min_value
            && transfer.value <= max_value
            && !spoke_pools.contains(&transfer.from)
    };

    let tuning = config.chain_tuning(&record.settlement_chain);
    let mut scanned_to = {
        let current = match client.get_block_number().await {
            Ok(current) => current,
            Err(e) => {
                warn!("Block number unavailable, starting at 0: {}", e);
                0
            }
        };
        let start = estimate_start_block(
            current,
            record.created_at,
            tuning.block_time_seconds,
            tuning.lookback_blocks,
        );
        let logs = client
            .get_logs_chunked(Some(token_address), &topics, start, current)
            .await
            .unwrap_or_default();
        for log in &logs {
            if let Some(transfer) = parse_erc20_transfer(log) {
                if matches(&transfer) {
                    return Some(SettlementCandidate {
                        tx_hash: transfer.transaction_hash,
                        block_number: transfer.block_number,
                    });
                }
                debug!(
                    "Transfer to {} ignored (value {} outside window or bridge fill)",
                    wallet, transfer.value
                );
            }
        }
        current
    };

    // Follow the head until the deadline
    loop {
        if Instant::now() >= deadline {
            return None;
        }

        if let Some(rx) = live.as_mut() {
            match tokio::time::timeout(poll_interval, rx.recv()).await {
                Ok(Some(log)) => {
                    if let Some(transfer) = parse_erc20_transfer(&log) {
                        if matches(&transfer) {
                            return Some(SettlementCandidate {
                                tx_hash: transfer.transaction_hash,
                                block_number: transfer.block_number,
                            });
                        }
                    }
                    continue;
                }
                Ok(None) => {
                    warn!(
                        "Log subscription closed for {}, falling back to polling",
                        record.payment_id
                    );
                    live = None;
                }
                Err(_) => {} // quiet interval; fall through to an incremental scan
            }
        } else {
            tokio::time::sleep(poll_interval).await;
        }

        // Incremental catch-up scan; also covers gaps in the subscription
        let current = match client.get_block_number().await {
            Ok(current) => current,
            Err(e) => {
                warn!("Transient block number failure: {}", e);
                continue;
            }
        };
        if current <= scanned_to {
            continue;
        }
        let logs = client
            .get_logs_chunked(Some(token_address), &topics, scanned_to + 1, current)
            .await
            .unwrap_or_default();
        scanned_to = current;
        for log in &logs {
            if let Some(transfer) = parse_erc20_transfer(log) {
                if matches(&transfer) {
                    return Some(SettlementCandidate {
                        tx_hash: transfer.transaction_hash,
                        block_number: transfer.block_number,
                    });
                }
            }
        }
    }
}

// ============================================================================
// NATIVE VALUE WATCH
// ============================================================================

/// Watches block transactions for a native-value payment to the wallet.
///
/// Accepts any transaction with `to = wallet` and `value >= 99%` of the
/// requested amount (native payments overshoot for gas rounding, so no
/// upper bound applies).
async fn find_native_transfer(
    config: &Config,
    client: &EvmClient,
    record: &crate::store::PaymentRecord,
    wallet: &str,
    deadline: Instant,
    poll_interval: Duration,
) -> Option<SettlementCandidate> {
    let expected = match parse_units(&amount_to_decimal_string(record.amount), 18) {
        Ok(expected) => expected,
        Err(e) => {
            warn!("Cannot scale amount for {}: {}", record.payment_id, e);
            return None;
        }
    };
    let min_value = min_accepted(expected);

    let tuning = config.chain_tuning(&record.settlement_chain);
    let mut next_block = match client.get_block_number().await {
        Ok(current) => estimate_start_block(
            current,
            record.created_at,
            tuning.block_time_seconds,
            tuning.lookback_blocks,
        ),
        Err(e) => {
            warn!("Transient block number failure: {}", e);
            0
        }
    };

    loop {
        if Instant::now() >= deadline {
            return None;
        }

        let head = match client.get_block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!("Transient block number failure: {}", e);
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        while next_block <= head {
            if Instant::now() >= deadline {
                return None;
            }
            match client.get_block_with_txs(next_block).await {
                Ok(Some(block)) => {
                    for tx in &block.transactions {
                        let to_wallet = tx
                            .to
                            .as_deref()
                            .map(|to| to.eq_ignore_ascii_case(wallet))
                            .unwrap_or(false);
                        let value = hex_to_u128(&tx.value).unwrap_or(0);
                        if to_wallet && value >= min_value {
                            return Some(SettlementCandidate {
                                tx_hash: tx.hash.clone(),
                                block_number: next_block,
                            });
                        }
                    }
                    next_block += 1;
                }
                Ok(None) => break, // block not produced yet
                Err(e) => {
                    warn!("Transient block fetch failure at {}: {}", next_block, e);
                    break;
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

// ============================================================================
// CONFIRMATIONS
// ============================================================================

/// Polls the chain head until the candidate has the required confirmations.
///
/// Returns the observed confirmation count, or `None` on deadline.
async fn await_confirmations(
    client: &EvmClient,
    tx_block: u64,
    required: u64,
    deadline: Instant,
    poll_interval: Duration,
) -> Option<u64> {
    loop {
        if Instant::now() >= deadline {
            return None;
        }
        match client.get_block_number().await {
            Ok(current) if current >= tx_block => {
                let confirmations = current - tx_block + 1;
                if confirmations >= required {
                    return Some(confirmations);
                }
                debug!("{}/{} confirmations", confirmations, required);
            }
            Ok(_) => {} // reorg below the tx block; keep waiting
            Err(e) => warn!("Transient block number failure: {}", e),
        }
        tokio::time::sleep(poll_interval).await;
    }
}
