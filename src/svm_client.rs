//! Solana RPC Client Module
//!
//! This module provides a client for the Solana JSON-RPC API plus the
//! transaction plumbing the bridge pipeline needs: token-account balance
//! polling, ATA/PDA derivation, instruction building (ApproveChecked, raw
//! program instructions, lamport transfers), and sign + send + poll-confirm
//! with an explicit deadline. Confirmation always polls signature statuses;
//! no persistent websocket is held against the Solana endpoint.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    signature::{Keypair, Signature, Signer},
    system_instruction,
    transaction::Transaction,
};
use tokio::time::Instant;
use tracing::debug;

// Well-known program IDs from Solana mainnet/devnet docs.
const ASSOCIATED_TOKEN_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";

/// Pause between signature-status polls.
const CONFIRM_POLL_MS: u64 = 2_000;

// ============================================================================
// JSON-RPC TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcContextual<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct RpcTokenAmount {
    amount: String,
    decimals: u8,
}

#[derive(Debug, Deserialize)]
struct RpcBlockhash {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
struct RpcSignatureStatus {
    #[serde(rename = "confirmationStatus")]
    confirmation_status: Option<String>,
    err: Option<serde_json::Value>,
}

/// Observed balance of an SPL token account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBalance {
    /// Raw token units
    pub amount: u64,
    /// Mint decimals as reported by the RPC
    pub decimals: u8,
}

// ============================================================================
// CLIENT
// ============================================================================

/// Client for the Solana JSON-RPC API.
///
/// Cheap to clone; safe to share between monitors.
#[derive(Debug, Clone)]
pub struct SvmClient {
    client: Client,
    rpc_url: String,
}

impl SvmClient {
    /// Creates a new Solana client for the given RPC URL.
    pub fn new(rpc_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
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
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", method))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(error) = response.error {
            return Err(anyhow::anyhow!("Solana RPC error: {}", error.message));
        }

        Ok(response.result)
    }

    /// Reads the balance of an SPL token account.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(TokenBalance))` - Account exists
    /// * `Ok(None)` - Account not created yet (expected before the first
    ///   transfer into a fresh ATA)
    pub async fn get_token_account_balance(&self, ata: &Pubkey) -> Result<Option<TokenBalance>> {
        let params = serde_json::json!([ata.to_string()]);
        let result: Result<Option<RpcContextual<RpcTokenAmount>>> =
            self.call("getTokenAccountBalance", params).await;

        match result {
            Ok(Some(contextual)) => {
                let amount = contextual
                    .value
                    .amount
                    .parse::<u64>()
                    .context("Invalid token amount in balance response")?;
                Ok(Some(TokenBalance {
                    amount,
                    decimals: contextual.value.decimals,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) if e.to_string().contains("could not find account") => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetches a recent blockhash for transaction signing.
    pub async fn get_latest_blockhash(&self) -> Result<Hash> {
        let params = serde_json::json!([{ "commitment": "confirmed" }]);
        let result: Option<RpcContextual<RpcBlockhash>> =
            self.call("getLatestBlockhash", params).await?;
        let blockhash = result
            .ok_or_else(|| anyhow::anyhow!("No result in getLatestBlockhash response"))?
            .value
            .blockhash;
        Hash::from_str(&blockhash).context("Invalid blockhash in response")
    }

    /// Submits a signed transaction, returning its signature.
    pub async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        let serialized = bincode::serialize(transaction).context("Failed to serialize transaction")?;
        let encoded = STANDARD.encode(serialized);
        let params = serde_json::json!([encoded, { "encoding": "base64" }]);
        let result: Option<String> = self.call("sendTransaction", params).await?;
        let signature = result.ok_or_else(|| anyhow::anyhow!("No signature in sendTransaction response"))?;
        Signature::from_str(&signature).context("Invalid signature in sendTransaction response")
    }

    /// Polls signature statuses until the signature confirms or the deadline
    /// passes.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Signature reached `confirmed` or `finalized`
    /// * `Err(anyhow::Error)` - On-chain failure or deadline exhausted
    pub async fn confirm_signature(&self, signature: &Signature, deadline: Instant) -> Result<()> {
        loop {
            if Instant::now() >= deadline {
                anyhow::bail!("Timed out waiting for confirmation of {}", signature);
            }

            let params = serde_json::json!([[signature.to_string()]]);
            let result: Option<RpcContextual<Vec<Option<RpcSignatureStatus>>>> =
                self.call("getSignatureStatuses", params).await?;

            if let Some(contextual) = result {
                if let Some(Some(status)) = contextual.value.first() {
                    if let Some(err) = &status.err {
                        anyhow::bail!("Transaction {} failed on chain: {}", signature, err);
                    }
                    if matches!(
                        status.confirmation_status.as_deref(),
                        Some("confirmed") | Some("finalized")
                    ) {
                        return Ok(());
                    }
                }
            }

            debug!("Signature {} not confirmed yet, polling again", signature);
            tokio::time::sleep(Duration::from_millis(CONFIRM_POLL_MS)).await;
        }
    }

    /// Builds, signs, submits, and confirms a transaction in one step.
    ///
    /// # Arguments
    ///
    /// * `instructions` - Instructions in execution order
    /// * `payer` - Fee payer; must also appear in `signers`
    /// * `signers` - Every required signer
    /// * `deadline` - Confirmation deadline
    pub async fn send_and_confirm(
        &self,
        instructions: &[Instruction],
        payer: &Keypair,
        signers: &[&Keypair],
        deadline: Instant,
    ) -> Result<Signature> {
        let blockhash = self.get_latest_blockhash().await?;
        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&payer.pubkey()),
            signers,
            blockhash,
        );
        let signature = self.send_transaction(&transaction).await?;
        self.confirm_signature(&signature, deadline).await?;
        Ok(signature)
    }
}

// ============================================================================
// DERIVATIONS AND INSTRUCTION BUILDERS
// ============================================================================

/// Returns the associated token program id as a Pubkey.
pub fn associated_token_program_id() -> Pubkey {
    Pubkey::from_str(ASSOCIATED_TOKEN_PROGRAM_ID).expect("constant associated token program id")
}

/// Derives the associated token account (ATA) for an owner and mint.
///
/// Deterministic in its inputs and valid for off-curve owners (PDAs), which
/// the spoke-pool vault derivation depends on.
pub fn derive_ata(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), spl_token::id().as_ref(), mint.as_ref()],
        &associated_token_program_id(),
    )
    .0
}

/// Derives a program address from raw seeds.
pub fn derive_pda(program: &Pubkey, seeds: &[&[u8]]) -> (Pubkey, u8) {
    Pubkey::find_program_address(seeds, program)
}

/// Builds an SPL `ApproveChecked` instruction.
///
/// # Arguments
///
/// * `source` - Token account granting the allowance
/// * `mint` - Token mint (checked against `decimals`)
/// * `delegate` - Account allowed to spend
/// * `owner` - Owner of the source account (transaction signer)
/// * `amount` - Raw allowance
/// * `decimals` - Mint decimals
pub fn build_approve_checked(
    source: &Pubkey,
    mint: &Pubkey,
    delegate: &Pubkey,
    owner: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Result<Instruction> {
    spl_token::instruction::approve_checked(
        &spl_token::id(),
        source,
        mint,
        delegate,
        owner,
        &[],
        amount,
        decimals,
    )
    .context("Failed to build ApproveChecked instruction")
}

/// Builds a raw program instruction from explicit accounts and data.
///
/// Used for programs whose instruction body is not expressible through an
/// SDK builder (the bridge deposit carries an 8-byte discriminator followed
/// by a Borsh payload).
pub fn build_raw_instruction(
    program: Pubkey,
    accounts: Vec<AccountMeta>,
    data: Vec<u8>,
) -> Instruction {
    Instruction {
        program_id: program,
        accounts,
        data,
    }
}

/// Builds a native lamport transfer instruction.
pub fn build_lamport_transfer(from: &Pubkey, to: &Pubkey, lamports: u64) -> Instruction {
    system_instruction::transfer(from, to, lamports)
}

// ============================================================================
// KEY CODECS
// ============================================================================

/// Decodes a base58 secret key string into a Keypair.
///
/// Solana secret keys are 64 bytes (seed + public key) encoded as base58.
pub fn keypair_from_base58(b58: &str) -> Result<Keypair> {
    let bytes = bs58::decode(b58)
        .into_vec()
        .context("Invalid base58 encoding")?;
    Keypair::try_from(bytes.as_slice())
        .map_err(|e| anyhow::anyhow!("Invalid keypair bytes: {}", e))
}

/// Encodes a Keypair's 64-byte secret as base58.
pub fn keypair_to_base58(keypair: &Keypair) -> String {
    bs58::encode(keypair.to_bytes()).into_string()
}

/// Parses a base58 pubkey string.
pub fn parse_pubkey(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("Invalid base58 pubkey '{}'", value))
}
