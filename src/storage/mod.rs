//! Wallet persistence seam
//!
//! The keyring never encrypts anything itself: it hands serialized key material to a
//! [`WalletStore`] together with the session password and gets it back on unlock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::core::errors::WalletError;
use crate::core::key_material::SerializedKeyMaterial;
use crate::security::redaction::redact_body;

mod memory;
pub use memory::MemoryWalletStore;

/// One persisted wallet record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredWallet {
    pub id: usize,
    pub data: SerializedKeyMaterial,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrase: Option<String>,
}

impl fmt::Debug for StoredWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredWallet")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("phrase", &self.phrase.as_deref().map(redact_body))
            .finish()
    }
}

/// Full replacement of the persisted wallet list.
pub struct SaveWalletsRequest {
    pub password: Zeroizing<String>,
    pub wallets: Vec<StoredWallet>,
    /// Opaque extra state persisted alongside the wallets.
    pub payload: Option<serde_json::Value>,
    /// Re-encrypt under this password when set.
    pub new_password: Option<Zeroizing<String>>,
}

/// Password-gated wallet storage.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Decrypt and return every stored wallet; a wrong password fails `IncorrectPassword`.
    async fn import_wallets(&self, password: &str) -> Result<Vec<StoredWallet>, WalletError>;

    async fn save_wallets(&self, request: SaveWalletsRequest) -> Result<(), WalletError>;
}
