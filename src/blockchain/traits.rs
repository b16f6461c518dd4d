use async_trait::async_trait;

use crate::blockchain::bitcoin::utxo::Utxo;
use crate::blockchain::ckb::skeleton::LiveCell;
use crate::core::errors::WalletError;
use crate::core::network::Network;

/// Source of spendable UTXOs for an address.
#[async_trait]
pub trait UtxoProvider: Send + Sync {
    /// Unspent outputs of `address`, in the order coin selection should consider them.
    async fn get_utxos(&self, address: &str, network: Network) -> Result<Vec<Utxo>, WalletError>;
}

/// Current fee rate of a UTXO network.
#[async_trait]
pub trait FeeRateProvider: Send + Sync {
    /// Fee rate in sat/vB.
    async fn fee_rate(&self, network: Network) -> Result<f64, WalletError>;
}

/// Source of live cells for a cell-chain address.
#[async_trait]
pub trait CellProvider: Send + Sync {
    async fn get_live_cells(&self, address: &str, network: Network) -> Result<Vec<LiveCell>, WalletError>;
}
