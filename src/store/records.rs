//! Payment record types and status transitions.
//!
//! A record is the durable source of truth for one payment. The orchestrator
//! creates it, exactly one monitor mutates it, and it is terminal once
//! `confirmed`, `expired`, or `error`. The JSON layout is the interchange
//! format read by the chat front-end and block-explorer links.

use serde::{Deserialize, Serialize};

use super::{StoreError, StoreResult};

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle status of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Direct payment created, transfer not yet located
    Pending,
    /// Bridge payment created, waiting for the user's Solana deposit
    WaitingDeposit,
    /// User deposit observed on the temp token account
    DepositReceived,
    /// Bridge deposit submitted, waiting for the destination fill
    Bridging,
    /// Transfer located, accumulating confirmations
    Confirming,
    /// Payment settled with the required confirmations
    Confirmed,
    /// Deadline passed without settlement
    Expired,
    /// Unrecoverable failure (bad config, failed bridge transaction)
    Error,
}

impl PaymentStatus {
    /// Whether this status ends the record's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Expired | Self::Error)
    }

    /// Whether moving from `self` to `next` is an allowed transition.
    ///
    /// Forward progress follows the two monitor state machines; any
    /// non-terminal status may fall to `expired` or `error`.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Expired | Self::Error) {
            return true;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Confirming)
                | (Self::Confirming, Self::Confirmed)
                | (Self::WaitingDeposit, Self::DepositReceived)
                | (Self::DepositReceived, Self::Bridging)
                | (Self::Bridging, Self::Confirmed)
        )
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// Bridge-specific fields of a payment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeDetails {
    /// Chain the user pays from
    pub source_chain: String,
    /// SPL mint of the token the user deposits on Solana
    pub input_token_mint: String,
    /// ERC-20 address of the token delivered on the settlement chain
    pub output_token_address: String,
    /// Raw units the user must deposit (amount + relay fee)
    pub raw_input_amount: u64,
    /// Raw units the business receives on the settlement chain
    pub raw_output_amount: u64,
    /// Raw units paid to the relayer
    pub relay_fee: u64,
    /// Disposable Solana wallet that owns the deposit account
    pub temp_wallet_pubkey: String,
    /// Token account (ATA of the temp wallet) the user deposits into
    pub deposit_address: String,
    /// Sealed secret key of the temp wallet; written once, read once
    pub temp_private_key_sealed: String,
    /// SpokePool program id on the source chain
    pub spoke_pool_source: String,
    /// SpokePool contract address on the settlement chain
    pub spoke_pool_destination: String,
    /// Across network id of the settlement chain
    pub destination_chain_id: u64,
    /// Quote timestamp passed to the bridge deposit
    pub quote_timestamp: u32,
    /// Deadline after which relayers stop filling this deposit
    pub fill_deadline: u32,
    /// Signature of the submitted bridge deposit transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_tx_sig: Option<String>,
    /// Deposit amount actually observed on the token account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_input_amount: Option<u64>,
}

/// Shape of the payment: direct transfer or bridged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentKind {
    /// Funds move straight to the settlement wallet on an EVM chain
    Direct,
    /// Funds enter on Solana and are bridged to the settlement chain
    Bridge(BridgeDetails),
}

/// One payment, as persisted under `pending/<payment_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Unique payment id (`pay_` + random suffix)
    pub payment_id: String,
    /// Business the payment belongs to
    pub business_id: String,
    /// Business display name, denormalized for notifications
    pub business_name: String,
    /// EVM wallet the business receives on
    pub settlement_wallet: String,
    /// Chat channel for the confirmation message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    /// Token symbol
    pub token: String,
    /// Chain the payment settles on
    pub settlement_chain: String,
    /// Requested amount in token units
    pub amount: f64,
    /// Current lifecycle status
    pub status: PaymentStatus,
    /// Unix seconds when the record was created
    pub created_at: u64,
    /// Unix seconds when an unpaid record expires
    pub expires_at: u64,
    /// Settlement transaction hash, once located
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Confirmations observed at settlement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    /// Unix seconds when the payment confirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<u64>,
    /// Unix seconds when the record expired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<u64>,
    /// Direct or bridge body
    #[serde(flatten)]
    pub kind: PaymentKind,
}

impl PaymentRecord {
    /// Moves the record to `next`, enforcing the allowed transitions.
    pub fn transition(&mut self, next: PaymentStatus) -> StoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Bridge body accessor.
    pub fn bridge(&self) -> Option<&BridgeDetails> {
        match &self.kind {
            PaymentKind::Bridge(details) => Some(details),
            PaymentKind::Direct => None,
        }
    }

    /// Mutable bridge body accessor.
    pub fn bridge_mut(&mut self) -> Option<&mut BridgeDetails> {
        match &mut self.kind {
            PaymentKind::Bridge(details) => Some(details),
            PaymentKind::Direct => None,
        }
    }
}
