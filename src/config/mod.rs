//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the payment
//! orchestration service. Configuration includes per-chain RPC endpoints,
//! token addresses, bridge parameters, monitoring cadence, and the API
//! server settings.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
///
/// This structure holds configuration for:
/// - RPC endpoints per chain tag (EVM settlement chains plus `solana`)
/// - Token addresses and mints per chain
/// - Bridge parameters (spoke pools, Across chain ids, relay fees)
/// - Monitoring cadence and deadlines
/// - Record store location and policy document path
/// - API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Root directory of the payment record store
    pub data_dir: PathBuf,
    /// Path of the business policy document (YAML with front-matter)
    pub policy_path: PathBuf,
    /// JSON-RPC endpoint URL per chain tag
    #[serde(default)]
    pub rpc: HashMap<String, String>,
    /// Token addresses per chain: chain tag -> symbol -> address or mint
    #[serde(default)]
    pub tokens: HashMap<String, HashMap<String, String>>,
    /// Bridge (Across protocol) parameters
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Monitoring cadence and deadlines
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Keystore encryption settings
    pub encryption: EncryptionConfig,
    /// Payment link settings
    pub payment: PaymentConfig,
    /// Solana operational settings (dispenser wallet)
    #[serde(default)]
    pub sol: SolConfig,
    /// Per-chain tuning for block math (block time, historical look-back)
    #[serde(default)]
    pub chains: HashMap<String, ChainTuning>,
    /// API server configuration (host, port, CORS settings)
    #[serde(default)]
    pub api: ApiConfig,
}

/// Bridge parameters for the Across protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// SpokePool contract address (EVM) or program id (Solana) per chain tag
    #[serde(default)]
    pub spoke_pools: HashMap<String, String>,
    /// Across network id per chain tag (Solana uses a large synthetic id)
    #[serde(default)]
    pub across_chain_ids: HashMap<String, u64>,
    /// Estimated relayer fee as a fraction of the payment amount (e.g. 0.006)
    #[serde(default = "default_relay_fee_pct")]
    pub estimated_relay_fee_pct: f64,
    /// Minimum relayer fee in token units (decimal string, e.g. "0.10")
    #[serde(default = "default_min_relay_fee_buffer")]
    pub min_relay_fee_buffer: String,
    /// Seconds after quote time when relayers stop being compensated
    #[serde(default = "default_fill_deadline_offset")]
    pub fill_deadline_offset_sec: u64,
    /// Blocks of history swept when watching for a fill
    #[serde(default = "default_fill_lookback_blocks")]
    pub fill_lookback_blocks: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            spoke_pools: HashMap::new(),
            across_chain_ids: HashMap::new(),
            estimated_relay_fee_pct: default_relay_fee_pct(),
            min_relay_fee_buffer: default_min_relay_fee_buffer(),
            fill_deadline_offset_sec: default_fill_deadline_offset(),
            fill_lookback_blocks: default_fill_lookback_blocks(),
        }
    }
}

/// Monitoring cadence and deadline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    /// Polling interval for chain queries in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Block confirmations required before a payment is final
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,
    /// Overall deadline for a direct payment monitor in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Overall deadline for a bridge pipeline monitor in milliseconds
    #[serde(default = "default_bridge_timeout_ms")]
    pub bridge_timeout_ms: u64,
}

/// Keystore encryption settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    /// AES-256 key protecting stored private keys (64 hex chars, 32 bytes)
    pub wallet_key: String,
}

/// Payment link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfig {
    /// Base URL prepended to generated payment links
    pub base_url: String,
    /// Hours until an unpaid payment record expires
    #[serde(default = "default_expiry_hours")]
    pub default_expiry_hours: u64,
}

/// Solana operational settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolConfig {
    /// Base58 secret of the dispenser wallet that funds temp wallets for fees
    #[serde(default)]
    pub dispenser_key: Option<String>,
    /// Lamports transferred from the dispenser to each temp wallet
    #[serde(default = "default_fund_amount_lamports")]
    pub fund_amount_lamports: u64,
}

impl Default for SolConfig {
    fn default() -> Self {
        Self {
            dispenser_key: None,
            fund_amount_lamports: default_fund_amount_lamports(),
        }
    }
}

/// Per-chain tuning for block arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTuning {
    /// Average seconds between blocks on this chain
    #[serde(default = "default_block_time_seconds")]
    pub block_time_seconds: u64,
    /// Maximum blocks to look back when scanning history
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
}

impl Default for ChainTuning {
    fn default() -> Self {
        Self {
            block_time_seconds: default_block_time_seconds(),
            lookback_blocks: default_lookback_blocks(),
        }
    }
}

/// API server configuration for external communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
    /// Allowed CORS origins for cross-origin requests
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8282,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            required_confirmations: default_required_confirmations(),
            timeout_ms: default_timeout_ms(),
            bridge_timeout_ms: default_bridge_timeout_ms(),
        }
    }
}

fn default_relay_fee_pct() -> f64 {
    0.006
}

fn default_min_relay_fee_buffer() -> String {
    "0.10".to_string()
}

fn default_fill_deadline_offset() -> u64 {
    21_600
}

fn default_fill_lookback_blocks() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_required_confirmations() -> u64 {
    20
}

fn default_timeout_ms() -> u64 {
    3_600_000
}

fn default_bridge_timeout_ms() -> u64 {
    7_200_000
}

fn default_expiry_hours() -> u64 {
    24
}

fn default_fund_amount_lamports() -> u64 {
    2_000_000
}

fn default_block_time_seconds() -> u64 {
    2
}

fn default_lookback_blocks() -> u64 {
    150
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Loads configuration from the TOML file.
    ///
    /// The path is taken from the `RAILCLAW_CONFIG_PATH` environment variable
    /// when set, otherwise `config/railclaw.toml`.
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - File missing, unparseable, or invalid
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RAILCLAW_CONFIG_PATH")
            .unwrap_or_else(|_| "config/railclaw.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            Self::load_from(&config_path)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/railclaw.template.toml config/railclaw.toml\n\
                Then edit config/railclaw.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Loads and validates configuration from an explicit path.
    pub fn load_from(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file '{}'", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file '{}'", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// This function ensures that:
    /// - The wallet encryption key is 32 bytes of hex
    /// - The estimated relay fee fraction is sane
    /// - The minimum relay fee buffer parses as a decimal amount
    /// - Every chain with a spoke pool also has an RPC endpoint
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - A setting is missing or malformed
    pub fn validate(&self) -> Result<()> {
        self.wallet_key_bytes()
            .context("Configuration error: encryption.walletKey")?;

        if !(0.0..1.0).contains(&self.bridge.estimated_relay_fee_pct) {
            anyhow::bail!(
                "Configuration error: bridge.estimatedRelayFeePct must be in [0, 1), got {}",
                self.bridge.estimated_relay_fee_pct
            );
        }

        if self
            .bridge
            .min_relay_fee_buffer
            .parse::<f64>()
            .map(|v| v < 0.0)
            .unwrap_or(true)
        {
            anyhow::bail!(
                "Configuration error: bridge.minRelayFeeBuffer must be a non-negative decimal, got '{}'",
                self.bridge.min_relay_fee_buffer
            );
        }

        for chain in self.bridge.spoke_pools.keys() {
            if !self.rpc.contains_key(chain) {
                anyhow::bail!(
                    "Configuration error: bridge.spokePools references chain '{}' but rpc.{} is not set",
                    chain,
                    chain
                );
            }
        }

        Ok(())
    }

    /// Returns the RPC endpoint for a chain tag.
    pub fn rpc_url(&self, chain: &str) -> Result<&str> {
        self.rpc
            .get(chain)
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("No RPC endpoint configured for chain '{}'", chain))
    }

    /// Looks up a token address or mint for a chain, case-insensitive on symbol.
    pub fn token_address(&self, chain: &str, symbol: &str) -> Option<&str> {
        let per_chain = self.tokens.get(chain)?;
        per_chain
            .iter()
            .find(|(sym, _)| sym.eq_ignore_ascii_case(symbol))
            .map(|(_, addr)| addr.as_str())
    }

    /// Returns the block-math tuning for a chain, falling back to defaults.
    pub fn chain_tuning(&self, chain: &str) -> ChainTuning {
        self.chains.get(chain).cloned().unwrap_or_default()
    }

    /// Decodes the configured wallet encryption key.
    pub fn wallet_key_bytes(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(self.encryption.wallet_key.trim())
            .context("walletKey must be a hex string")?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("walletKey must decode to exactly 32 bytes"))?;
        Ok(key)
    }

    /// Returns the spoke pool address for a chain tag.
    pub fn spoke_pool(&self, chain: &str) -> Result<&str> {
        self.bridge
            .spoke_pools
            .get(chain)
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("No spoke pool configured for chain '{}'", chain))
    }

    /// Returns the Across network id for a chain tag.
    pub fn across_chain_id(&self, chain: &str) -> Result<u64> {
        self.bridge
            .across_chain_ids
            .get(chain)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No Across chain id configured for chain '{}'", chain))
    }
}
