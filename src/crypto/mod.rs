//! Sealed Secret Module
//!
//! This module provides the seal/open pair used to protect private keys at
//! rest: the disposable per-payment Solana key inside a bridge record and
//! the business wallet keystore. AES-256-GCM with a random 96-bit nonce
//! prepended to the ciphertext; the whole blob is base64 for embedding in
//! JSON files.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::Rng;

/// Length of the AES-GCM nonce prepended to each sealed blob.
const NONCE_LEN: usize = 12;

/// Seals plaintext under the given 32-byte key.
///
/// # Arguments
///
/// * `plaintext` - Secret bytes to protect
/// * `key` - AES-256 key
///
/// # Returns
///
/// * `Ok(String)` - base64 of `nonce || ciphertext || tag`
/// * `Err(anyhow::Error)` - Encryption failed
pub fn seal(plaintext: &[u8], key: &[u8; 32]) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce_bytes[..]);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("Failed to seal secret: {}", e))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(blob))
}

/// Opens a sealed blob produced by [`seal`].
///
/// # Arguments
///
/// * `sealed` - base64 blob (`nonce || ciphertext || tag`)
/// * `key` - AES-256 key
///
/// # Returns
///
/// * `Ok(Vec<u8>)` - Recovered plaintext
/// * `Err(anyhow::Error)` - Wrong key, truncated blob, or tampered data
pub fn open(sealed: &str, key: &[u8; 32]) -> Result<Vec<u8>> {
    let blob = STANDARD
        .decode(sealed.trim())
        .context("Sealed blob is not valid base64")?;
    if blob.len() < NONCE_LEN {
        anyhow::bail!("Sealed blob too short: {} bytes", blob.len());
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| anyhow::anyhow!("Failed to open sealed secret: {}", e))
}
