//! Keyring registry and orchestrator
//!
//! Owns one [`KeyMaterial`] per wallet (slot position = wallet id) and forwards every
//! request to the active wallet. Active-wallet state comes from an injected
//! [`WalletSelection`]; every multi-step flow snapshots it once at the start.

mod lifecycle;
mod signing;
mod transfer;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use crate::blockchain::bitcoin::address as btc_address;
use crate::blockchain::traits::{CellProvider, FeeRateProvider, UtxoProvider};
use crate::core::config::KeyringConfig;
use crate::core::errors::WalletError;
use crate::core::hd_path::{Bip44Path, HdPath};
use crate::core::key_material::{KeyCapabilities, KeyMaterial};
use crate::core::network::{AddressType, Network};
use crate::hardware::HardwareDevice;
use crate::storage::WalletStore;

pub use lifecycle::WalletSource;
pub use signing::{InputSelector, ToSignInput};
pub use transfer::SentCoin;

/// The wallet and account requests are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAccount {
    pub wallet_id: usize,
    pub network: Network,
    pub address_type: AddressType,
    /// Address index under the base path of `address_type`.
    #[serde(default)]
    pub account_index: u32,
}

/// Active wallet state owned by the host application.
pub trait WalletSelection: Send + Sync {
    fn active_account(&self) -> Result<ActiveAccount, WalletError>;
}

/// Selection held in memory and switched explicitly.
pub struct StaticSelection {
    current: RwLock<ActiveAccount>,
}

impl StaticSelection {
    pub fn new(account: ActiveAccount) -> Self {
        Self {
            current: RwLock::new(account),
        }
    }

    pub fn set(&self, account: ActiveAccount) {
        *self.current.write() = account;
    }
}

impl WalletSelection for StaticSelection {
    fn active_account(&self) -> Result<ActiveAccount, WalletError> {
        Ok(*self.current.read())
    }
}

pub(crate) struct WalletSlot {
    pub(crate) key: Arc<KeyMaterial>,
    pub(crate) phrase: Option<Zeroizing<String>>,
}

/// Active account and its key material, captured together.
#[derive(Clone)]
pub(crate) struct Snapshot {
    pub(crate) account: ActiveAccount,
    pub(crate) key: Arc<KeyMaterial>,
}

pub struct Keyring {
    store: Arc<dyn WalletStore>,
    selection: Arc<dyn WalletSelection>,
    config: KeyringConfig,
    wallets: Arc<RwLock<Vec<WalletSlot>>>,
    password: RwLock<Option<Zeroizing<String>>>,
    hardware: Option<Arc<dyn HardwareDevice>>,
    utxo_provider: Option<Arc<dyn UtxoProvider>>,
    fee_rate_provider: Option<Arc<dyn FeeRateProvider>>,
    cell_provider: Option<Arc<dyn CellProvider>>,
}

impl Keyring {
    pub fn new(
        store: Arc<dyn WalletStore>,
        selection: Arc<dyn WalletSelection>,
        config: KeyringConfig,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        Ok(Self {
            store,
            selection,
            config,
            wallets: Arc::new(RwLock::new(Vec::new())),
            password: RwLock::new(None),
            hardware: None,
            utxo_provider: None,
            fee_rate_provider: None,
            cell_provider: None,
        })
    }

    pub fn with_hardware(mut self, device: Arc<dyn HardwareDevice>) -> Self {
        self.hardware = Some(device);
        self
    }

    pub fn with_utxo_provider(mut self, provider: Arc<dyn UtxoProvider>) -> Self {
        self.utxo_provider = Some(provider);
        self
    }

    pub fn with_fee_rate_provider(mut self, provider: Arc<dyn FeeRateProvider>) -> Self {
        self.fee_rate_provider = Some(provider);
        self
    }

    pub fn with_cell_provider(mut self, provider: Arc<dyn CellProvider>) -> Self {
        self.cell_provider = Some(provider);
        self
    }

    pub fn config(&self) -> &KeyringConfig {
        &self.config
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.read().len()
    }

    /// Key material of wallet `id`.
    pub fn wallet(&self, id: usize) -> Result<Arc<KeyMaterial>, WalletError> {
        self.wallets
            .read()
            .get(id)
            .map(|slot| slot.key.clone())
            .ok_or_else(|| WalletError::AccountNotFound(format!("no wallet with id {}", id)))
    }

    pub(crate) fn snapshot(&self) -> Result<Snapshot, WalletError> {
        let account = self.selection.active_account()?;
        account.address_type.check_network(account.network)?;
        let key = self.wallet(account.wallet_id)?;
        debug!(
            "active wallet {} ({}) on {}",
            account.wallet_id,
            key.kind(),
            account.network
        );
        Ok(Snapshot { account, key })
    }

    /// Base path of `address_type` for this key material.
    fn base_path(key: &KeyMaterial, address_type: AddressType, network: Network) -> HdPath {
        Bip44Path::for_address_type(address_type, network, key.is_network_base_hd_path()).to_hd_path()
    }

    /// Path of the active account; simple keys always use the empty path.
    pub(crate) fn account_path(snapshot: &Snapshot) -> Result<HdPath, WalletError> {
        if snapshot.key.is_simple_key() {
            return Ok(HdPath::root());
        }
        let account = &snapshot.account;
        Self::base_path(&snapshot.key, account.address_type, account.network).child(account.account_index)
    }

    /// Map an address back to the path that controls it.
    pub(crate) fn path_for_address(&self, snapshot: &Snapshot, address: &str) -> Result<HdPath, WalletError> {
        let network = snapshot.account.network;
        let address_type = if network.is_ckb() {
            AddressType::CkbSecp256k1
        } else {
            btc_address::detect_type(address, network)?
        };
        let script = btc_address::script_from_address(address, network)?;
        self.scan(snapshot, address_type, |pk| {
            Ok(btc_address::descriptor(address_type, pk, network)?.script == script)
        })
        .map_err(|e| match e {
            WalletError::AccountNotFound(_) => {
                WalletError::AccountNotFound(format!("address {} is not controlled by this wallet", address))
            }
            other => other,
        })
    }

    /// Map a compressed public key back to the path that controls it.
    pub(crate) fn path_for_public_key(&self, snapshot: &Snapshot, public_key: &str) -> Result<HdPath, WalletError> {
        let wanted = public_key.trim_start_matches("0x").to_ascii_lowercase();
        let address_type = snapshot.account.address_type;
        self.scan(snapshot, address_type, |pk| Ok(hex::encode(pk.serialize()) == wanted))
            .map_err(|e| match e {
                WalletError::AccountNotFound(_) => {
                    WalletError::AccountNotFound(format!("public key {} is not in this wallet", public_key))
                }
                other => other,
            })
    }

    /// First path under the base of `address_type`, within the lookahead, whose key matches.
    fn scan<F>(&self, snapshot: &Snapshot, address_type: AddressType, matches: F) -> Result<HdPath, WalletError>
    where
        F: Fn(&bitcoin::secp256k1::PublicKey) -> Result<bool, WalletError>,
    {
        let key = &snapshot.key;
        if key.is_remote_device() {
            return Err(WalletError::Unsupported(
                "remote device inputs must be selected by path".to_string(),
            ));
        }
        if key.is_simple_key() {
            let root = HdPath::root();
            let public_key = key.keypair(&root)?.public_key();
            return if matches(&public_key)? {
                Ok(root)
            } else {
                Err(WalletError::AccountNotFound("raw key does not match".to_string()))
            };
        }

        let base = Self::base_path(key, address_type, snapshot.account.network);
        for index in 0..self.config.accounts.address_lookahead {
            let path = base.child(index)?;
            if matches(&key.keypair(&path)?.public_key())? {
                debug!("selector resolved to {}", path);
                return Ok(path);
            }
        }
        Err(WalletError::AccountNotFound(format!(
            "nothing within {} indices of {}",
            self.config.accounts.address_lookahead, base
        )))
    }
}
