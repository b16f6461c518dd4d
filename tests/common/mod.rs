#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use wallet_keyring::blockchain::bitcoin::utxo::Utxo;
use wallet_keyring::blockchain::ckb::LiveCell;
use wallet_keyring::blockchain::traits::{CellProvider, FeeRateProvider, UtxoProvider};
use wallet_keyring::core::config::KeyringConfig;
use wallet_keyring::core::keyring::{ActiveAccount, Keyring, StaticSelection, WalletSource};
use wallet_keyring::core::network::{AddressType, Network};
use wallet_keyring::storage::MemoryWalletStore;
use wallet_keyring::WalletError;

pub const ABANDON: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const ZOO: &str = "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo wrong";
pub const PASSWORD: &str = "correct horse";

pub fn account(network: Network, address_type: AddressType) -> ActiveAccount {
    ActiveAccount {
        wallet_id: 0,
        network,
        address_type,
        account_index: 0,
    }
}

pub struct Fixture {
    pub keyring: Keyring,
    pub selection: Arc<StaticSelection>,
    pub store: Arc<MemoryWalletStore>,
}

/// Unlocked keyring with one mnemonic wallet, built by `customize`.
pub async fn fixture_with<F>(active: ActiveAccount, source: WalletSource, customize: F) -> Fixture
where
    F: FnOnce(Keyring) -> Keyring,
{
    let store = Arc::new(MemoryWalletStore::new());
    let selection = Arc::new(StaticSelection::new(active));
    let keyring = Keyring::new(store.clone(), selection.clone(), KeyringConfig::default())
        .expect("default config is valid");
    let keyring = customize(keyring);
    keyring.init(PASSWORD).await.expect("unlock");
    keyring.new_keyring(source).await.expect("import");
    Fixture {
        keyring,
        selection,
        store,
    }
}

pub async fn fixture(active: ActiveAccount) -> Fixture {
    fixture_with(active, WalletSource::mnemonic(ABANDON), |k| k).await
}

/// Fixed UTXO set; optionally switches the active selection when queried.
pub struct StaticUtxos {
    pub utxos: Vec<Utxo>,
    pub on_fetch: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl StaticUtxos {
    pub fn new(utxos: Vec<Utxo>) -> Self {
        Self {
            utxos,
            on_fetch: Mutex::new(None),
        }
    }
}

#[async_trait]
impl UtxoProvider for StaticUtxos {
    async fn get_utxos(&self, _address: &str, _network: Network) -> Result<Vec<Utxo>, WalletError> {
        if let Some(hook) = self.on_fetch.lock().take() {
            hook();
        }
        Ok(self.utxos.clone())
    }
}

pub struct StaticFeeRate(pub f64);

#[async_trait]
impl FeeRateProvider for StaticFeeRate {
    async fn fee_rate(&self, _network: Network) -> Result<f64, WalletError> {
        Ok(self.0)
    }
}

pub struct StaticCells(pub Vec<LiveCell>);

#[async_trait]
impl CellProvider for StaticCells {
    async fn get_live_cells(&self, _address: &str, _network: Network) -> Result<Vec<LiveCell>, WalletError> {
        Ok(self.0.clone())
    }
}
