use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::{Keyring, WalletSlot};
use crate::core::errors::WalletError;
use crate::core::hd_path::HdPath;
use crate::core::key_material::{self, DeviceDescriptor, KeyCapabilities, KeyMaterial, RawKey, RemoteDeviceKey, SeedKey};
use crate::storage::{SaveWalletsRequest, StoredWallet};

/// Where a new wallet's key material comes from.
pub enum WalletSource {
    Mnemonic {
        phrase: Zeroizing<String>,
        passphrase: Zeroizing<String>,
        /// Keep the mainnet coin type on test networks (legacy import flavor).
        legacy_hd_path: bool,
    },
    /// WIF or 32-byte hex.
    RawKey(Zeroizing<String>),
    Device(DeviceDescriptor),
}

impl WalletSource {
    pub fn mnemonic(phrase: &str) -> Self {
        WalletSource::Mnemonic {
            phrase: Zeroizing::new(phrase.to_string()),
            passphrase: Zeroizing::new(String::new()),
            legacy_hd_path: false,
        }
    }

    pub fn raw_key(encoded: &str) -> Self {
        WalletSource::RawKey(Zeroizing::new(encoded.to_string()))
    }

    fn into_slot(self) -> Result<WalletSlot, WalletError> {
        match self {
            WalletSource::Mnemonic {
                phrase,
                passphrase,
                legacy_hd_path,
            } => {
                let key = SeedKey::from_mnemonic(&phrase, &passphrase, !legacy_hd_path)?;
                Ok(WalletSlot {
                    key: Arc::new(KeyMaterial::Seed(key)),
                    phrase: Some(phrase),
                })
            }
            WalletSource::RawKey(encoded) => Ok(WalletSlot {
                key: Arc::new(KeyMaterial::Raw(RawKey::import(&encoded)?)),
                phrase: None,
            }),
            WalletSource::Device(descriptor) => Ok(WalletSlot {
                key: Arc::new(KeyMaterial::RemoteDevice(RemoteDeviceKey::new(
                    descriptor.connect_id,
                    descriptor.device_id,
                ))),
                phrase: None,
            }),
        }
    }
}

fn to_stored(slots: &[WalletSlot]) -> Vec<StoredWallet> {
    slots
        .iter()
        .enumerate()
        .map(|(id, slot)| StoredWallet {
            id,
            data: slot.key.serialize(),
            phrase: slot.phrase.as_ref().map(|p| p.to_string()),
        })
        .collect()
}

impl Keyring {
    /// Unlock the store and rebuild every wallet from its persisted record.
    pub async fn init(&self, password: &str) -> Result<usize, WalletError> {
        info!("unlocking keyring");
        let mut stored = self.store.import_wallets(password).await?;
        stored.sort_by_key(|w| w.id);

        let slots = stored
            .into_iter()
            .map(|w| {
                Ok(WalletSlot {
                    key: Arc::new(KeyMaterial::deserialize(&w.data)?),
                    phrase: w.phrase.map(Zeroizing::new),
                })
            })
            .collect::<Result<Vec<_>, WalletError>>()?;

        let count = slots.len();
        *self.wallets.write() = slots;
        *self.password.write() = Some(Zeroizing::new(password.to_string()));
        info!("✅ keyring unlocked with {} wallets", count);
        Ok(count)
    }

    fn session_password(&self) -> Result<Zeroizing<String>, WalletError> {
        self.password
            .read()
            .clone()
            .ok_or_else(|| WalletError::IncorrectPassword("keyring is locked".to_string()))
    }

    fn canonical_path(&self) -> Result<HdPath, WalletError> {
        HdPath::parse(&self.config.accounts.canonical_duplicate_path)
    }

    fn check_duplicate(&self, slots: &[WalletSlot], candidate: &KeyMaterial) -> Result<(), WalletError> {
        let path = self.canonical_path()?;
        let fingerprint = candidate.export_public_key(&path)?;
        for (id, slot) in slots.iter().enumerate() {
            if slot.key.export_public_key(&path)? == fingerprint {
                warn!("import rejected: same key as wallet {}", id);
                return Err(WalletError::AlreadyExisted(format!("wallet {} holds the same key", id)));
            }
        }
        Ok(())
    }

    /// Add a wallet and persist the new list. Returns the new wallet id.
    pub async fn new_keyring(&self, source: WalletSource) -> Result<usize, WalletError> {
        let password = self.session_password()?;
        let slot = source.into_slot()?;
        info!("importing {} wallet", slot.key.kind());

        let mut stored = {
            let wallets = self.wallets.read();
            self.check_duplicate(&wallets, &slot.key)?;
            to_stored(&wallets)
        };
        let id = stored.len();
        stored.push(StoredWallet {
            id,
            data: slot.key.serialize(),
            phrase: slot.phrase.as_ref().map(|p| p.to_string()),
        });

        self.store
            .save_wallets(SaveWalletsRequest {
                password,
                wallets: stored,
                payload: None,
                new_password: None,
            })
            .await?;

        let mut wallets = self.wallets.write();
        // a concurrent import may have landed while the store was busy
        self.check_duplicate(&wallets, &slot.key)?;
        wallets.push(slot);
        let id = wallets.len() - 1;
        info!("✅ wallet {} added", id);
        Ok(id)
    }

    /// Remove wallet `id`; later wallets shift down by one.
    pub async fn delete_wallet(&self, id: usize) -> Result<(), WalletError> {
        let password = self.session_password()?;
        let stored = {
            let wallets = self.wallets.read();
            if id >= wallets.len() {
                return Err(WalletError::AccountNotFound(format!("no wallet with id {}", id)));
            }
            let mut stored = to_stored(&wallets);
            stored.remove(id);
            stored.iter_mut().enumerate().for_each(|(i, w)| w.id = i);
            stored
        };

        self.store
            .save_wallets(SaveWalletsRequest {
                password,
                wallets: stored,
                payload: None,
                new_password: None,
            })
            .await?;

        let mut wallets = self.wallets.write();
        if id < wallets.len() {
            wallets.remove(id);
        }
        info!("wallet {} deleted, {} remain", id, wallets.len());
        Ok(())
    }

    /// Re-persist every wallet under `new_password`.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), WalletError> {
        if new_password.is_empty() {
            return Err(WalletError::InvalidInput("new password is empty".to_string()));
        }
        let stored = to_stored(&self.wallets.read());
        self.store
            .save_wallets(SaveWalletsRequest {
                password: Zeroizing::new(old_password.to_string()),
                wallets: stored,
                payload: None,
                new_password: Some(Zeroizing::new(new_password.to_string())),
            })
            .await?;
        *self.password.write() = Some(Zeroizing::new(new_password.to_string()));
        info!("✅ keyring password changed");
        Ok(())
    }

    /// Fresh 12-word phrase; not imported.
    pub fn generate_mnemonic(&self) -> Result<Zeroizing<String>, WalletError> {
        key_material::generate_mnemonic()
    }
}
