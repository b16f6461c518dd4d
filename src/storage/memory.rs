use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use super::{SaveWalletsRequest, StoredWallet, WalletStore};
use crate::core::errors::WalletError;
use crate::security::secret::password_to_secret;

#[derive(Default)]
struct Vault {
    password_hash: Option<[u8; 32]>,
    wallets: Vec<StoredWallet>,
    payload: Option<serde_json::Value>,
}

/// In-process [`WalletStore`]. Only the password check is modeled; records are kept in memory.
#[derive(Default)]
pub struct MemoryWalletStore {
    vault: RwLock<Vault>,
}

fn password_hash(password: &str) -> [u8; 32] {
    let secret = password_to_secret(password);
    Sha256::digest(&secret[..]).into()
}

impl Vault {
    /// The first password ever presented becomes the vault password.
    fn check(&self, password: &str) -> Result<(), WalletError> {
        match &self.password_hash {
            None => Ok(()),
            Some(expected) => {
                if bool::from(expected.ct_eq(&password_hash(password))) {
                    Ok(())
                } else {
                    Err(WalletError::IncorrectPassword("vault password mismatch".to_string()))
                }
            }
        }
    }
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(&self) -> Option<serde_json::Value> {
        self.vault.read().payload.clone()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn import_wallets(&self, password: &str) -> Result<Vec<StoredWallet>, WalletError> {
        let vault = self.vault.read();
        vault.check(password)?;
        debug!("memory store: {} wallets unlocked", vault.wallets.len());
        Ok(vault.wallets.clone())
    }

    async fn save_wallets(&self, request: SaveWalletsRequest) -> Result<(), WalletError> {
        let mut vault = self.vault.write();
        vault.check(&request.password)?;
        let password = request.new_password.as_ref().unwrap_or(&request.password);
        vault.password_hash = Some(password_hash(password));
        vault.wallets = request.wallets;
        if request.payload.is_some() {
            vault.payload = request.payload;
        }
        info!("memory store: {} wallets saved", vault.wallets.len());
        Ok(())
    }
}
