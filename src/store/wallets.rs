//! Business wallet keystore.
//!
//! One encrypted keystore per business under `wallets/`. The private key is
//! sealed by the onboarding flow before it reaches this store; files are
//! written with owner-only permissions.

use serde::{Deserialize, Serialize};

use super::{PaymentStore, StoreError, StoreResult};

/// Encrypted wallet keystore, one per business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletKeystore {
    /// Business the wallet belongs to
    pub business_id: String,
    /// Contact email captured at onboarding
    pub email: String,
    /// EVM address of the wallet
    pub address: String,
    /// Sealed private key (see `crypto::seal`)
    pub encrypted_private_key: String,
    /// BIP-44 derivation path used at generation
    pub derivation_path: String,
    /// Unix seconds when the wallet was generated
    pub created_at: u64,
}

impl PaymentStore {
    /// Persists a wallet keystore with owner-only file permissions.
    pub fn write_wallet(&self, keystore: &WalletKeystore) -> StoreResult<()> {
        let path = self.wallet_path(&keystore.business_id);
        self.write_json_atomic(&path, keystore)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms)?;
        }
        Ok(())
    }

    /// Loads the wallet keystore for a business.
    pub fn read_wallet(&self, business_id: &str) -> StoreResult<WalletKeystore> {
        let path = self.wallet_path(business_id);
        if !path.exists() {
            return Err(StoreError::NotFound(business_id.to_string()));
        }
        self.read_json(&path)
    }
}
