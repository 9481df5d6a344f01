//! Across Protocol Encoding Module
//!
//! This module contains the bit-exact encodings the bridge depends on: the
//! Solana SpokePool deposit instruction (Anchor discriminator + Borsh
//! parameters), the delegate PDA derived from those exact parameter bytes,
//! the static SpokePool PDAs, and the destination-side `FilledRelay` event
//! decoder (the bytes32 schema variant).

use anyhow::{Context, Result};
use borsh::{BorshDeserialize, BorshSerialize};
use sha3::{Digest, Keccak256};
use solana_program::pubkey::Pubkey;
use solana_sdk::instruction::{AccountMeta, Instruction};

use crate::evm_client::{hex_to_u128, hex_to_u64, topic_to_address, EvmLog};
use crate::svm_client::derive_ata;

// ============================================================================
// DEPOSIT INSTRUCTION ENCODING
// ============================================================================

/// First 8 bytes of `SHA256("global:deposit")`, the Anchor method selector
/// of the SpokePool deposit instruction.
pub fn deposit_discriminator() -> [u8; 8] {
    let hash = solana_program::hash::hash(b"global:deposit");
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash.to_bytes()[..8]);
    discriminator
}

/// Parameters of a SpokePool deposit, in exact wire order.
///
/// EVM-side values travel as 32-byte words: addresses left-padded into
/// `Pubkey`-shaped fields, the output amount as a big-endian u256. Borsh
/// gives the integers their little-endian encoding and the `message` its
/// length prefix.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq)]
pub struct DepositParams {
    /// Depositing wallet on Solana
    pub depositor: Pubkey,
    /// Recipient on the destination chain (EVM address, left-padded)
    pub recipient: Pubkey,
    /// SPL mint being deposited
    pub input_token: Pubkey,
    /// Token delivered on the destination chain (EVM address, left-padded)
    pub output_token: Pubkey,
    /// Raw input units
    pub input_amount: u64,
    /// Raw output units as big-endian u256
    pub output_amount: [u8; 32],
    /// Across network id of the destination chain
    pub destination_chain_id: u64,
    /// Relayer with an exclusivity window (zero for none)
    pub exclusive_relayer: Pubkey,
    /// Quote timestamp, seconds
    pub quote_timestamp: u32,
    /// Deadline after which relayers stop filling, seconds
    pub fill_deadline: u32,
    /// Exclusivity window parameter (zero for none)
    pub exclusivity_parameter: u32,
    /// Message delivered to the recipient (empty for plain transfers)
    pub message: Vec<u8>,
}

/// Packs a raw amount into a big-endian u256 word.
pub fn amount_to_u256_be(amount: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&amount.to_be_bytes());
    word
}

/// Left-pads a 20-byte EVM address into a 32-byte `Pubkey`-shaped word.
pub fn evm_address_to_word(address: &str) -> Result<Pubkey> {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(stripped).context("Invalid hex EVM address")?;
    if bytes.len() != 20 {
        anyhow::bail!("EVM address must be 20 bytes, got {}", bytes.len());
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(Pubkey::new_from_array(word))
}

/// Derives the deposit delegate PDA for a parameter set.
///
/// Seeds are `["delegate", keccak256(borsh(params))]` where the hashed bytes
/// are exactly the instruction payload (minus the discriminator). The
/// on-chain program recomputes this from the received parameters, so any
/// byte drift here makes the deposit unspendable.
pub fn derive_delegate(program: &Pubkey, params: &DepositParams) -> Result<(Pubkey, u8)> {
    let encoded = borsh::to_vec(params).context("Failed to encode deposit params")?;
    let mut hasher = Keccak256::new();
    hasher.update(&encoded);
    let seed_hash: [u8; 32] = hasher.finalize().into();
    Ok(Pubkey::find_program_address(
        &[b"delegate", &seed_hash],
        program,
    ))
}

/// Static PDAs of a SpokePool program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpokePoolAccounts {
    /// Program state account
    pub state: Pubkey,
    /// Anchor event authority
    pub event_authority: Pubkey,
    /// Token vault: ATA of the state account for the input mint
    pub vault: Pubkey,
}

/// Derives the static SpokePool accounts for an input mint.
pub fn derive_spoke_pool_accounts(program: &Pubkey, input_mint: &Pubkey) -> SpokePoolAccounts {
    let (state, _) = Pubkey::find_program_address(&[b"state"], program);
    let (event_authority, _) = Pubkey::find_program_address(&[b"__event_authority"], program);
    let vault = derive_ata(&state, input_mint);
    SpokePoolAccounts {
        state,
        event_authority,
        vault,
    }
}

/// Builds the SpokePool deposit instruction.
///
/// Account order is fixed by the program; reordering breaks the deposit.
#[allow(clippy::too_many_arguments)]
pub fn deposit_instruction(
    program: &Pubkey,
    signer: &Pubkey,
    delegate: &Pubkey,
    depositor_token_account: &Pubkey,
    mint: &Pubkey,
    pool: &SpokePoolAccounts,
    params: &DepositParams,
) -> Result<Instruction> {
    let mut data = deposit_discriminator().to_vec();
    data.extend(borsh::to_vec(params).context("Failed to encode deposit params")?);

    let associated_token_program = crate::svm_client::associated_token_program_id();
    let accounts = vec![
        AccountMeta::new(*signer, true),
        AccountMeta::new(pool.state, false),
        AccountMeta::new_readonly(*delegate, false),
        AccountMeta::new(*depositor_token_account, false),
        AccountMeta::new(pool.vault, false),
        AccountMeta::new_readonly(*mint, false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(associated_token_program, false),
        AccountMeta::new_readonly(solana_program::system_program::id(), false),
        AccountMeta::new_readonly(pool.event_authority, false),
        AccountMeta::new_readonly(*program, false),
    ];

    Ok(crate::svm_client::build_raw_instruction(*program, accounts, data))
}

// ============================================================================
// FILLED RELAY EVENT
// ============================================================================

/// Signature string of the current (bytes32) `FilledRelay` schema.
const FILLED_RELAY_SIGNATURE: &str = "FilledRelay(bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint32,uint32,bytes32,bytes32,bytes32,bytes32,bytes32,(bytes32,bytes32,uint256,uint8))";

/// Number of 32-byte words in the event's data section.
const FILLED_RELAY_DATA_WORDS: usize = 15;

/// Topic 0 of the `FilledRelay` event.
pub fn filled_relay_topic0() -> String {
    let mut hasher = Keccak256::new();
    hasher.update(FILLED_RELAY_SIGNATURE.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// A decoded `FilledRelay` event from a destination SpokePool.
#[derive(Debug, Clone, PartialEq)]
pub struct FilledRelayEvent {
    /// Across network id of the origin chain (indexed)
    pub origin_chain_id: u64,
    /// Token delivered to the recipient, lowercase 0x address
    pub output_token: String,
    /// Raw units delivered
    pub output_amount: u128,
    /// Recipient of the fill, lowercase 0x address
    pub recipient: String,
    /// Block the fill landed in
    pub block_number: u64,
    /// Fill transaction hash
    pub transaction_hash: String,
}

/// Decodes a `FilledRelay` log.
///
/// Data layout (non-indexed fields, declaration order): inputToken,
/// outputToken, inputAmount, outputAmount, repaymentChainId, fillDeadline,
/// exclusivityDeadline, exclusiveRelayer, depositor, recipient, messageHash,
/// then the inlined relayExecutionInfo tuple. Address-typed bytes32 fields
/// carry the address right-aligned in the word.
///
/// # Returns
///
/// * `Some(FilledRelayEvent)` - Log matches the schema
/// * `None` - Wrong topic, topic count, or truncated data
pub fn parse_filled_relay(log: &EvmLog) -> Option<FilledRelayEvent> {
    if log.topics.len() != 4 || !log.topics[0].eq_ignore_ascii_case(&filled_relay_topic0()) {
        return None;
    }

    let data = log.data.strip_prefix("0x").unwrap_or(&log.data);
    if data.len() < FILLED_RELAY_DATA_WORDS * 64 {
        return None;
    }
    let word = |index: usize| &data[index * 64..(index + 1) * 64];

    let origin_chain_id = hex_to_u64(&log.topics[1]).ok()?;
    let output_token = topic_to_address(&format!("0x{}", word(1)))?;
    let output_amount = hex_to_u128(word(3))?;
    let recipient = topic_to_address(&format!("0x{}", word(9)))?;
    let block_number = hex_to_u64(&log.block_number).ok()?;

    Some(FilledRelayEvent {
        origin_chain_id,
        output_token,
        output_amount,
        recipient,
        block_number,
        transaction_hash: log.transaction_hash.clone(),
    })
}
