//! Bridge Payment Pipeline Monitor
//!
//! Drives a bridged payment through its three serial stages:
//!
//! 1. **Deposit watch**: poll the one-time Solana token account until the
//!    user's deposit arrives.
//! 2. **Bridge deposit**: unseal the disposable key, grant the delegate PDA
//!    spending authority, and submit the SpokePool deposit.
//! 3. **Fill watch**: watch the destination SpokePool for the matching
//!    `FilledRelay` event.
//!
//! The record's status mirrors the current stage, so a restart that finds a
//! record in `bridging` can resume at stage 3 with a widened look-back.
//! Stages 1 and 2 are never repeated once their effects are recorded: the
//! deposit instruction must not be submitted twice.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::across::{
    amount_to_u256_be, derive_delegate, derive_spoke_pool_accounts, deposit_instruction,
    evm_address_to_word, filled_relay_topic0, parse_filled_relay, DepositParams, FilledRelayEvent,
};
use crate::config::Config;
use crate::crypto;
use crate::evm_client::EvmClient;
use crate::monitor::generic::{mark_error, mark_expired, max_accepted_fill, min_accepted};
use crate::store::{
    unix_now, BridgeDetails, Notification, NotificationType, PaymentStatus, PaymentStore,
};
use crate::svm_client::{
    build_approve_checked, build_lamport_transfer, keypair_from_base58, parse_pubkey, SvmClient,
};

/// Widened fill look-back used when resuming at stage 3 after a restart.
const RESUME_LOOKBACK_BLOCKS: u64 = 2_000;

/// Runs the bridge pipeline monitor to completion.
///
/// # Arguments
///
/// * `config` - Service configuration
/// * `store` - Payment record store
/// * `payment_id` - Record to monitor; must be a `bridge` record
/// * `resume_stage3` - Skip stages 1-2; the record must already be `bridging`
///
/// # Returns
///
/// The terminal status the record reached.
pub async fn run_bridge_monitor(
    config: Arc<Config>,
    store: PaymentStore,
    payment_id: String,
    resume_stage3: bool,
) -> Result<PaymentStatus> {
    let record = store.get(&payment_id)?;
    let Some(bridge) = record.bridge().cloned() else {
        return Ok(mark_error(&store, &payment_id, "record is not a bridge payment"));
    };

    let deadline = Instant::now() + Duration::from_millis(config.monitoring.bridge_timeout_ms);
    let poll_interval = Duration::from_millis(config.monitoring.poll_interval_ms);

    let fill_lookback = if resume_stage3 {
        if record.status != PaymentStatus::Bridging {
            return Ok(mark_error(
                &store,
                &payment_id,
                "resume requested but record is not bridging",
            ));
        }
        info!("Bridge monitor resuming {} at the fill watch", payment_id);
        RESUME_LOOKBACK_BLOCKS
    } else {
        config.bridge.fill_lookback_blocks
    };

    if !resume_stage3 {
        // Stage 1: wait for the user's deposit on the temp token account
        let observed = match watch_deposit(&config, &bridge, deadline, poll_interval).await {
            Ok(Some(observed)) => observed,
            Ok(None) => return Ok(mark_expired(&store, &payment_id)),
            Err(e) => return Ok(mark_error(&store, &payment_id, &e.to_string())),
        };
        info!(
            "Deposit of {} raw units observed for {} on {}",
            observed.amount, payment_id, bridge.deposit_address
        );
        store.transition(&payment_id, PaymentStatus::DepositReceived, |r| {
            if let Some(details) = r.bridge_mut() {
                details.actual_input_amount = Some(observed.amount);
            }
        })?;

        // Stage 2: approve the delegate and submit the bridge deposit.
        // Errors here are fatal: the deposit may be half-applied on chain
        // and must never be retried blindly.
        let signature = match submit_bridge_deposit(
            &config,
            &record.settlement_wallet,
            &bridge,
            observed.amount,
            observed.decimals,
            deadline,
        )
        .await
        {
            Ok(signature) => signature,
            Err(e) => return Ok(mark_error(&store, &payment_id, &e.to_string())),
        };
        info!("Bridge deposit submitted for {}: {}", payment_id, signature);
        store.transition(&payment_id, PaymentStatus::Bridging, |r| {
            if let Some(details) = r.bridge_mut() {
                details.deposit_tx_sig = Some(signature.clone());
            }
        })?;
    }

    // Stage 3: watch the destination SpokePool for the matching fill
    let record = store.get(&payment_id)?;
    let bridge = record.bridge().cloned().context("bridge body vanished")?;
    let fill = match watch_fill(
        &config,
        &record.settlement_chain,
        &record.settlement_wallet,
        &bridge,
        fill_lookback,
        deadline,
        poll_interval,
    )
    .await
    {
        Ok(Some(fill)) => fill,
        Ok(None) => return Ok(mark_expired(&store, &payment_id)),
        Err(e) => return Ok(mark_error(&store, &payment_id, &e.to_string())),
    };

    let confirmations = fill_confirmations(&config, &record.settlement_chain, &fill).await;
    let confirmed_at = unix_now();
    let record = store.transition(&payment_id, PaymentStatus::Confirmed, |r| {
        r.tx_hash = Some(fill.transaction_hash.clone());
        r.confirmations = Some(confirmations);
        r.confirmed_at = Some(confirmed_at);
    })?;
    store.enqueue_notification(
        &payment_id,
        &Notification {
            notification_type: NotificationType::BridgeConfirmed,
            payment_id: payment_id.clone(),
            business_id: record.business_id.clone(),
            business_name: record.business_name.clone(),
            token: record.token.clone(),
            amount: record.amount,
            settlement_chain: record.settlement_chain.clone(),
            tx_hash: record.tx_hash.clone(),
            deposit_tx_sig: record.bridge().and_then(|b| b.deposit_tx_sig.clone()),
            confirmations: Some(confirmations),
            confirmed_at,
            chat_id: record.chat_id.clone(),
        },
    )?;

    info!(
        "Bridge payment {} confirmed: fill tx {} ({} confirmations)",
        payment_id, fill.transaction_hash, confirmations
    );
    Ok(PaymentStatus::Confirmed)
}

// ============================================================================
// STAGE 1: DEPOSIT WATCH
// ============================================================================

/// Balance observed on the deposit token account.
#[derive(Debug, Clone, Copy)]
struct ObservedDeposit {
    amount: u64,
    decimals: u8,
}

/// Polls the deposit token account until the user's funds arrive.
///
/// The account is an ATA that only exists after the first transfer into it,
/// so a missing account is the normal starting state, not an error.
///
/// # Returns
///
/// * `Ok(Some(ObservedDeposit))` - Balance reached 99% of the required input
/// * `Ok(None)` - Deadline passed
async fn watch_deposit(
    config: &Config,
    bridge: &BridgeDetails,
    deadline: Instant,
    poll_interval: Duration,
) -> Result<Option<ObservedDeposit>> {
    let client = SvmClient::new(config.rpc_url("solana")?)?;
    let deposit_address = parse_pubkey(&bridge.deposit_address)?;
    let required = min_accepted(bridge.raw_input_amount as u128) as u64;

    loop {
        if Instant::now() >= deadline {
            return Ok(None);
        }

        match client.get_token_account_balance(&deposit_address).await {
            Ok(Some(balance)) if balance.amount >= required => {
                return Ok(Some(ObservedDeposit {
                    amount: balance.amount,
                    decimals: balance.decimals,
                }));
            }
            Ok(Some(balance)) => {
                info!(
                    "Partial deposit on {}: {} of {} raw units",
                    bridge.deposit_address, balance.amount, bridge.raw_input_amount
                );
            }
            Ok(None) => {} // account not created yet
            Err(e) => warn!("Transient balance poll failure: {}", e),
        }

        tokio::time::sleep(poll_interval).await;
    }
}

// ============================================================================
// STAGE 2: BRIDGE DEPOSIT
// ============================================================================

/// Funds the temp wallet, approves the delegate PDA, and submits the
/// SpokePool deposit.
///
/// The delegate PDA is derived from the exact parameter bytes the deposit
/// instruction carries; the approval and the deposit therefore go into one
/// transaction built from a single `DepositParams` value.
async fn submit_bridge_deposit(
    config: &Config,
    settlement_wallet: &str,
    bridge: &BridgeDetails,
    actual_input: u64,
    decimals: u8,
    deadline: Instant,
) -> Result<String> {
    let client = SvmClient::new(config.rpc_url("solana")?)?;

    let wallet_key = config.wallet_key_bytes()?;
    let secret = crypto::open(&bridge.temp_private_key_sealed, &wallet_key)
        .context("Failed to unseal temp wallet key")?;
    let secret = String::from_utf8(secret).context("Sealed temp key is not valid UTF-8")?;
    let temp = keypair_from_base58(&secret)?;

    let temp_pubkey = parse_pubkey(&bridge.temp_wallet_pubkey)?;
    if solana_sdk::signer::Signer::pubkey(&temp) != temp_pubkey {
        anyhow::bail!("Unsealed key does not match the recorded temp wallet");
    }

    // The temp wallet starts empty; the dispenser covers its transaction fees
    if let Some(dispenser_key) = &config.sol.dispenser_key {
        let dispenser = keypair_from_base58(dispenser_key)
            .context("Invalid sol.dispenserKey configuration")?;
        let transfer = build_lamport_transfer(
            &solana_sdk::signer::Signer::pubkey(&dispenser),
            &temp_pubkey,
            config.sol.fund_amount_lamports,
        );
        let signature = client
            .send_and_confirm(&[transfer], &dispenser, &[&dispenser], deadline)
            .await
            .context("Failed to fund temp wallet from dispenser")?;
        info!("Funded temp wallet {}: {}", temp_pubkey, signature);
    }

    let program = parse_pubkey(&bridge.spoke_pool_source)?;
    let mint = parse_pubkey(&bridge.input_token_mint)?;
    let deposit_token_account = parse_pubkey(&bridge.deposit_address)?;

    let params = DepositParams {
        depositor: temp_pubkey,
        recipient: evm_address_to_word(settlement_wallet)?,
        input_token: mint,
        output_token: evm_address_to_word(&bridge.output_token_address)?,
        input_amount: actual_input,
        output_amount: amount_to_u256_be(bridge.raw_output_amount),
        destination_chain_id: bridge.destination_chain_id,
        exclusive_relayer: solana_program::pubkey::Pubkey::default(),
        quote_timestamp: bridge.quote_timestamp,
        fill_deadline: bridge.fill_deadline,
        exclusivity_parameter: 0,
        message: Vec::new(),
    };

    let (delegate, _) = derive_delegate(&program, &params)?;
    let pool = derive_spoke_pool_accounts(&program, &mint);

    let approve = build_approve_checked(
        &deposit_token_account,
        &mint,
        &delegate,
        &temp_pubkey,
        actual_input,
        decimals,
    )?;
    let deposit = deposit_instruction(
        &program,
        &temp_pubkey,
        &delegate,
        &deposit_token_account,
        &mint,
        &pool,
        &params,
    )?;

    let signature = client
        .send_and_confirm(&[approve, deposit], &temp, &[&temp], deadline)
        .await
        .context("Bridge deposit transaction failed")?;
    Ok(signature.to_string())
}

// ============================================================================
// STAGE 3: FILL WATCH
// ============================================================================

/// Watches the destination SpokePool for the fill matching this payment.
///
/// The live subscription is registered before the historical sweep starts,
/// so a fast fill landing between deposit submission and the sweep is
/// buffered rather than lost; whichever path sees the match first resolves
/// the stage.
///
/// # Returns
///
/// * `Ok(Some(FilledRelayEvent))` - Matching fill located
/// * `Ok(None)` - Deadline passed
async fn watch_fill(
    config: &Config,
    settlement_chain: &str,
    settlement_wallet: &str,
    bridge: &BridgeDetails,
    lookback_blocks: u64,
    deadline: Instant,
    poll_interval: Duration,
) -> Result<Option<FilledRelayEvent>> {
    let client = EvmClient::new(config.rpc_url(settlement_chain)?)?;
    let origin_chain_id = config.across_chain_id(&bridge.source_chain)?;

    let wallet = settlement_wallet.to_lowercase();
    let output_token = bridge.output_token_address.to_lowercase();
    let min_output = min_accepted(bridge.raw_output_amount as u128);
    let max_output = max_accepted_fill(bridge.raw_output_amount as u128);

    let matches = |event: &FilledRelayEvent| -> bool {
        event.origin_chain_id == origin_chain_id
            && event.recipient == wallet
            && event.output_token == output_token
            && event.output_amount >= min_output
            && event.output_amount <= max_output
    };

    let topics = vec![
        Some(filled_relay_topic0()),
        Some(format!("0x{:064x}", origin_chain_id)),
    ];
    let spoke_pool = bridge.spoke_pool_destination.as_str();

    // Register the push channel first; fills that land during the
    // historical sweep queue up in its buffer.
    let mut live = match client.subscribe_logs(Some(spoke_pool), &topics).await {
        Ok(rx) => Some(rx),
        Err(e) => {
            warn!("Fill subscription unavailable, polling only: {}", e);
            None
        }
    };

    let mut scanned_to = {
        let current = client.get_block_number().await.unwrap_or(0);
        let start = current.saturating_sub(lookback_blocks);
        let logs = client
            .get_logs_chunked(Some(spoke_pool), &topics, start, current)
            .await
            .unwrap_or_default();
        for log in &logs {
            if let Some(event) = parse_filled_relay(log) {
                if matches(&event) {
                    return Ok(Some(event));
                }
            }
        }
        current
    };

    loop {
        if Instant::now() >= deadline {
            return Ok(None);
        }

        if let Some(rx) = live.as_mut() {
            match tokio::time::timeout(poll_interval, rx.recv()).await {
                Ok(Some(log)) => {
                    if let Some(event) = parse_filled_relay(&log) {
                        if matches(&event) {
                            return Ok(Some(event));
                        }
                    }
                    continue;
                }
                Ok(None) => {
                    warn!("Fill subscription closed, falling back to polling");
                    live = None;
                }
                Err(_) => {} // quiet interval; catch up below
            }
        } else {
            tokio::time::sleep(poll_interval).await;
        }

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
            .get_logs_chunked(Some(spoke_pool), &topics, scanned_to + 1, current)
            .await
            .unwrap_or_default();
        scanned_to = current;
        for log in &logs {
            if let Some(event) = parse_filled_relay(log) {
                if matches(&event) {
                    return Ok(Some(event));
                }
            }
        }
    }
}

/// Confirmations of the fill at the moment of observation.
async fn fill_confirmations(config: &Config, settlement_chain: &str, fill: &FilledRelayEvent) -> u64 {
    let Ok(url) = config.rpc_url(settlement_chain) else {
        return 1;
    };
    let Ok(client) = EvmClient::new(url) else {
        return 1;
    };
    match client.get_block_number().await {
        Ok(current) if current >= fill.block_number => current - fill.block_number + 1,
        _ => 1,
    }
}
