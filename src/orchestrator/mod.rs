//! Payment Orchestrator Module
//!
//! The orchestrator turns a parsed payment command into either a direct EVM
//! payment request or a Solana-to-EVM bridged payment, gated by the
//! business policy. It loads the policy fresh for every request, routes the
//! command, writes the payment record, and launches the settlement monitor
//! as a detached task before returning to the caller.

use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::{Keypair, Signer};
use tracing::info;

use crate::config::Config;
use crate::crypto;
use crate::monitor::generic::{amount_to_decimal_string, format_units, parse_units};
use crate::monitor::MonitorRegistry;
use crate::policy::{Policy, PolicyStore};
use crate::store::{
    unix_now, BridgeDetails, ListFilter, PaymentKind, PaymentRecord, PaymentStatus, PaymentStore,
    StoreError,
};
use crate::svm_client::{derive_ata, keypair_to_base58, parse_pubkey};

/// Decimals of the stablecoin class carried over the bridge (USDC/USDT).
/// Stage 2 re-reads the real decimals from the chain before approving; this
/// constant only scales the quoted amounts.
const BRIDGE_TOKEN_DECIMALS: u8 = 6;

// ============================================================================
// REQUEST / RESPONSE SHAPES
// ============================================================================

/// Action requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestAction {
    /// Create a payment and start monitoring it
    CreatePaymentLink,
    /// Read one payment record
    CheckPayment,
    /// List payment records
    ListPayments,
}

/// A parsed payment command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Requested action
    pub action: RequestAction,
    /// Amount in token units
    #[serde(default)]
    pub amount: f64,
    /// Token symbol
    #[serde(default)]
    pub token: String,
    /// Chain the user wants to pay on
    #[serde(default)]
    pub chain: String,
    /// Payment id (check_payment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Business id the command addresses; checked against the policy owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<String>,
    /// Whether the user asked for an installment plan
    #[serde(default)]
    pub emi: bool,
}

/// Which policy rule a rejected request violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    Chain,
    Token,
    Amount,
    Emi,
}

/// Instructions handed to a user paying over the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeInstructions {
    /// Solana token account to deposit into
    pub deposit_address: String,
    /// Amount the user must send (business amount plus relay fee)
    pub amount_to_send: String,
    /// Relay fee included in the amount to send
    pub relay_fee: String,
    /// Amount the business receives on the settlement chain
    pub business_receives: String,
    /// Chain the funds settle on
    pub settlement_chain: String,
    /// Wallet the funds settle to
    pub settlement_wallet: String,
}

/// Outcome of a payment command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentResponse {
    /// Direct payment created; the link renders the payment page
    Executed { payment_id: String, link: String },
    /// Bridged payment created; the user deposits on Solana
    BridgePayment {
        payment_id: String,
        bridge_instructions: BridgeInstructions,
    },
    /// Request violates the business policy
    Rejected {
        violation: Violation,
        policy: serde_json::Value,
        received: serde_json::Value,
    },
    /// Business is not onboarded or the policy is unusable
    NotReady { reason: String },
    /// One payment record (check_payment)
    Payment { record: PaymentRecord },
    /// Payment records (list_payments)
    Payments { records: Vec<PaymentRecord> },
    /// Unknown payment id
    NotFound { payment_id: String },
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Policy-gated request router.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    policy_store: PolicyStore,
    store: PaymentStore,
    registry: MonitorRegistry,
}

impl Orchestrator {
    /// Creates an orchestrator over the given store and monitor registry.
    pub fn new(
        config: Arc<Config>,
        store: PaymentStore,
        registry: MonitorRegistry,
    ) -> Self {
        let policy_store = PolicyStore::new(&config.policy_path);
        Self {
            config,
            policy_store,
            store,
            registry,
        }
    }

    /// Handles a parsed payment command.
    pub async fn handle(&self, request: PaymentRequest) -> Result<PaymentResponse> {
        match request.action {
            RequestAction::CreatePaymentLink => self.create_payment_link(&request).await,
            RequestAction::CheckPayment => {
                let payment_id = request
                    .payment_id
                    .as_deref()
                    .context("check_payment requires payment_id")?;
                self.check_payment(payment_id)
            }
            RequestAction::ListPayments => self.list_payments(&ListFilter::default()),
        }
    }

    /// Creates a payment, routed by the freshly loaded policy.
    pub async fn create_payment_link(&self, request: &PaymentRequest) -> Result<PaymentResponse> {
        // A fresh load every request: policy edits take effect on the next
        // command with no restart.
        let policy = match self.policy_store.load() {
            Ok(policy) => policy,
            Err(e) => {
                return Ok(PaymentResponse::NotReady {
                    reason: e.to_string(),
                })
            }
        };
        if !policy.is_ready() {
            return Ok(PaymentResponse::NotReady {
                reason: "business is not onboarded or policy is inactive".to_string(),
            });
        }
        if let Some(business) = &request.business {
            if *business != policy.business.id {
                return Ok(PaymentResponse::NotReady {
                    reason: format!("unknown business '{}'", business),
                });
            }
        }

        // Routing order is decisive: a user-payable source chain with the
        // bridge enabled routes over the bridge even if the chain also
        // happens to be an allowed settlement chain.
        let chain = request.chain.to_lowercase();
        let route_bridge = policy.user_payable(&chain) && policy.cross_chain.bridge.enabled;
        if !route_bridge && !policy.allows_chain(&chain) {
            return Ok(PaymentResponse::Rejected {
                violation: Violation::Chain,
                policy: serde_json::json!(policy.specification.allowed_chains),
                received: serde_json::json!(chain),
            });
        }

        if !policy.allows_token(&request.token) {
            return Ok(PaymentResponse::Rejected {
                violation: Violation::Token,
                policy: serde_json::json!(policy.specification.allowed_tokens),
                received: serde_json::json!(request.token),
            });
        }

        let max_single = policy.restrictions.max_single_payment;
        if max_single > 0.0 && request.amount > max_single {
            return Ok(PaymentResponse::Rejected {
                violation: Violation::Amount,
                policy: serde_json::json!(max_single),
                received: serde_json::json!(request.amount),
            });
        }

        if request.emi && !policy.operational.emi_enabled {
            return Ok(PaymentResponse::Rejected {
                violation: Violation::Emi,
                policy: serde_json::json!("emi_disabled"),
                received: serde_json::json!(true),
            });
        }

        if route_bridge {
            self.create_bridge_payment(request, &policy, &chain).await
        } else {
            self.create_direct_payment(request, &policy, &chain).await
        }
    }

    /// Reads one payment record.
    pub fn check_payment(&self, payment_id: &str) -> Result<PaymentResponse> {
        match self.store.get(payment_id) {
            Ok(record) => Ok(PaymentResponse::Payment { record }),
            Err(StoreError::NotFound(_)) => Ok(PaymentResponse::NotFound {
                payment_id: payment_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists payment records.
    pub fn list_payments(&self, filter: &ListFilter) -> Result<PaymentResponse> {
        let records = self.store.list(filter)?;
        Ok(PaymentResponse::Payments { records })
    }

    // ------------------------------------------------------------------
    // Record construction
    // ------------------------------------------------------------------

    async fn create_direct_payment(
        &self,
        request: &PaymentRequest,
        policy: &Policy,
        chain: &str,
    ) -> Result<PaymentResponse> {
        let payment_id = generate_payment_id();
        let now = unix_now();
        let record = PaymentRecord {
            payment_id: payment_id.clone(),
            business_id: policy.business.id.clone(),
            business_name: policy.business.name.clone(),
            settlement_wallet: policy.business.wallet.to_lowercase(),
            chat_id: policy.business.chat_id.clone(),
            token: request.token.to_uppercase(),
            settlement_chain: chain.to_string(),
            amount: request.amount,
            status: PaymentStatus::Pending,
            created_at: now,
            expires_at: now + self.config.payment.default_expiry_hours * 3_600,
            tx_hash: None,
            confirmations: None,
            confirmed_at: None,
            expired_at: None,
            kind: PaymentKind::Direct,
        };
        self.store.create(&record)?;

        self.registry.spawn_for_record(
            self.config.clone(),
            self.store.clone(),
            &payment_id,
            false,
            false,
        );
        info!(
            "Direct payment {} created: {} {} on {}",
            payment_id, request.amount, record.token, chain
        );

        Ok(PaymentResponse::Executed {
            link: format!("{}/p/{}", self.config.payment.base_url, payment_id),
            payment_id,
        })
    }

    async fn create_bridge_payment(
        &self,
        request: &PaymentRequest,
        policy: &Policy,
        source_chain: &str,
    ) -> Result<PaymentResponse> {
        let settlement_chain = policy.cross_chain.bridge.settlement_chain.to_lowercase();

        let input_mint = match self.config.token_address(source_chain, &request.token) {
            Some(mint) => mint.to_string(),
            None => {
                return Ok(PaymentResponse::NotReady {
                    reason: format!(
                        "token {} is not configured on {}",
                        request.token, source_chain
                    ),
                })
            }
        };
        let output_token = match self.config.token_address(&settlement_chain, &request.token) {
            Some(address) => address.to_lowercase(),
            None => {
                return Ok(PaymentResponse::NotReady {
                    reason: format!(
                        "token {} is not configured on {}",
                        request.token, settlement_chain
                    ),
                })
            }
        };
        let spoke_pool_source = self.config.spoke_pool(source_chain)?.to_string();
        let spoke_pool_destination = self.config.spoke_pool(&settlement_chain)?.to_lowercase();
        let destination_chain_id = self.config.across_chain_id(&settlement_chain)?;

        // Amounts in raw units: the business receives `amount`, the user
        // sends `amount + relay_fee`.
        let raw_output = parse_units(
            &amount_to_decimal_string(request.amount),
            BRIDGE_TOKEN_DECIMALS,
        )? as u64;
        let relay_fee = self.relay_fee_raw(raw_output)?;
        let raw_input = raw_output
            .checked_add(relay_fee)
            .context("Bridge amount overflow")?;

        // Disposable wallet: its ATA is the one-time deposit address, and
        // its sealed key is written exactly once.
        let temp = Keypair::new();
        let mint_pubkey = parse_pubkey(&input_mint)?;
        let deposit_address = derive_ata(&temp.pubkey(), &mint_pubkey);
        let wallet_key = self.config.wallet_key_bytes()?;
        let sealed = crypto::seal(keypair_to_base58(&temp).as_bytes(), &wallet_key)?;

        let now = unix_now();
        let payment_id = generate_payment_id();
        let record = PaymentRecord {
            payment_id: payment_id.clone(),
            business_id: policy.business.id.clone(),
            business_name: policy.business.name.clone(),
            settlement_wallet: policy.business.wallet.to_lowercase(),
            chat_id: policy.business.chat_id.clone(),
            token: request.token.to_uppercase(),
            settlement_chain: settlement_chain.clone(),
            amount: request.amount,
            status: PaymentStatus::WaitingDeposit,
            created_at: now,
            expires_at: now + self.config.payment.default_expiry_hours * 3_600,
            tx_hash: None,
            confirmations: None,
            confirmed_at: None,
            expired_at: None,
            kind: PaymentKind::Bridge(BridgeDetails {
                source_chain: source_chain.to_string(),
                input_token_mint: input_mint,
                output_token_address: output_token,
                raw_input_amount: raw_input,
                raw_output_amount: raw_output,
                relay_fee,
                temp_wallet_pubkey: temp.pubkey().to_string(),
                deposit_address: deposit_address.to_string(),
                temp_private_key_sealed: sealed,
                spoke_pool_source,
                spoke_pool_destination,
                destination_chain_id,
                quote_timestamp: now as u32,
                fill_deadline: (now + self.config.bridge.fill_deadline_offset_sec) as u32,
                deposit_tx_sig: None,
                actual_input_amount: None,
            }),
        };
        self.store.create(&record)?;

        self.registry.spawn_for_record(
            self.config.clone(),
            self.store.clone(),
            &payment_id,
            true,
            false,
        );
        info!(
            "Bridge payment {} created: {} {} from {} settling on {}",
            payment_id, request.amount, record.token, source_chain, settlement_chain
        );

        Ok(PaymentResponse::BridgePayment {
            bridge_instructions: BridgeInstructions {
                deposit_address: deposit_address.to_string(),
                amount_to_send: format_units(raw_input as u128, BRIDGE_TOKEN_DECIMALS),
                relay_fee: format_units(relay_fee as u128, BRIDGE_TOKEN_DECIMALS),
                business_receives: format_units(raw_output as u128, BRIDGE_TOKEN_DECIMALS),
                settlement_chain,
                settlement_wallet: record.settlement_wallet.clone(),
            },
            payment_id,
        })
    }

    /// Relay fee in raw units: `max(amount * feePct, minRelayFeeBuffer)`.
    fn relay_fee_raw(&self, raw_output: u64) -> Result<u64> {
        // parts-per-million keeps the fee arithmetic in integers
        let fee_ppm = (self.config.bridge.estimated_relay_fee_pct * 1_000_000.0).round() as u128;
        let pct_fee = (raw_output as u128) * fee_ppm / 1_000_000;
        let min_fee = parse_units(
            &self.config.bridge.min_relay_fee_buffer,
            BRIDGE_TOKEN_DECIMALS,
        )?;
        Ok(pct_fee.max(min_fee) as u64)
    }
}

/// Generates a payment id: `pay_` plus twelve random lowercase hex chars.
fn generate_payment_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: u64 = rng.gen_range(0..0x1000_0000_0000);
    format!("pay_{:012x}", suffix)
}
