use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Transaction;
use ckb_types::core::TransactionView;
use ckb_types::prelude::Entity;
use std::str::FromStr;
use tracing::{debug, info};

use super::{Keyring, Snapshot};
use crate::blockchain::bitcoin::signer::{self, SignInput};
use crate::blockchain::bitcoin::transaction::{CoinTransfer, CoinTransferBuilder, SenderAccount};
use crate::blockchain::bitcoin::utxo::{checked_total, VsizeFeeEstimator};
use crate::blockchain::ckb::{address as ckb_address, transfer as ckb_transfer, CkbTransferBuilder};
use crate::core::errors::WalletError;
use crate::core::key_material::KeyCapabilities;

/// Signed coin transfer, ready to broadcast.
#[derive(Debug, Clone)]
pub struct SentCoin {
    pub psbt: Psbt,
    pub transaction: Transaction,
    pub fee: u64,
    pub change: Option<u64>,
}

impl Keyring {
    async fn sender_public_key(&self, snapshot: &Snapshot) -> Result<PublicKey, WalletError> {
        let path = Keyring::account_path(snapshot)?;
        let hex_key = self.public_key_at(snapshot, &path).await?;
        PublicKey::from_str(&hex_key)
            .map_err(|e| WalletError::Unsupported(format!("no public key for this wallet: {}", e)))
    }

    /// Build, sign and finalize a coin transfer from the active account.
    ///
    /// The active account is captured once; selection changes while providers are
    /// awaited do not affect which key signs.
    pub async fn send_coin(&self, transfer: &CoinTransfer) -> Result<SentCoin, WalletError> {
        let snapshot = self.snapshot()?;
        let network = snapshot.account.network;
        network.require_bitcoin()?;
        let utxo_provider = self
            .utxo_provider
            .as_ref()
            .ok_or_else(|| WalletError::Unsupported("no UTXO provider attached".to_string()))?;

        let address = self.address_of(&snapshot).await?;
        let public_key = self.sender_public_key(&snapshot).await?;
        info!("send_coin from {}: {} sat to {}", address, transfer.amount, transfer.to_address);

        let utxos = utxo_provider.get_utxos(&address, network).await?;
        let available = checked_total(&utxos)?;
        debug!("{} UTXOs worth {} sat", utxos.len(), available);

        let fee_rate = match &self.fee_rate_provider {
            Some(provider) => provider.fee_rate(network).await?,
            None => self.config.bitcoin.default_fee_rate,
        };
        let builder = CoinTransferBuilder::new(
            network,
            self.config.bitcoin.dust_floor,
            VsizeFeeEstimator::new(fee_rate)?,
        )?;
        let sender = SenderAccount {
            address_type: snapshot.account.address_type,
            public_key,
        };
        let plan = builder.build(&sender, &utxos, transfer)?;

        let path = Keyring::account_path(&snapshot)?;
        let inputs: Vec<SignInput> = (0..plan.psbt.inputs.len())
            .map(|index| SignInput::new(index, path.clone()))
            .collect();
        let mut psbt = plan.psbt;
        self.sign_resolved(&snapshot, &mut psbt, &inputs, true).await?;
        let transaction = signer::extract_transaction(&psbt)?;

        info!("✅ coin transfer signed: txid={}, fee={}", transaction.txid(), plan.fee);
        Ok(SentCoin {
            psbt,
            transaction,
            fee: plan.fee,
            change: plan.change,
        })
    }

    /// Build and seal a capacity transfer from the active cell-chain account.
    pub async fn send_ckb(&self, to_address: &str, amount: u64) -> Result<TransactionView, WalletError> {
        let snapshot = self.snapshot()?;
        let network = snapshot.account.network;
        let builder = CkbTransferBuilder::new(network, self.config.ckb.clone())?;
        let cell_provider = self
            .cell_provider
            .as_ref()
            .ok_or_else(|| WalletError::Unsupported("no cell provider attached".to_string()))?;

        let public_key = self.sender_public_key(&snapshot).await?;
        let sender_lock = ckb_address::lock_from_public_key(&public_key);
        let sender_address = ckb_address::encode_address(&sender_lock, network)?;
        let to_lock = ckb_address::parse_address(to_address, network)?;
        info!("send_ckb from {}: {} shannons to {}", sender_address, amount, to_address);

        let cells = cell_provider.get_live_cells(&sender_address, network).await?;
        let plan = builder.build(&sender_lock, &cells, to_lock, amount)?;

        let path = Keyring::account_path(&snapshot)?;
        let key = snapshot.key.clone();
        let tx = ckb_transfer::sign_and_seal(&plan, |digest| key.sign_recoverable(&path, digest))?;
        debug!("✅ cell-chain transfer sealed: hash=0x{}", hex::encode(tx.hash().as_slice()));
        Ok(tx)
    }
}
