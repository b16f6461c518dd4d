//! Coin transfer builder
//!
//! Greedy sequential coin selection over plain UTXOs, recomputing the fee after
//! every added input, producing an unsigned PSBT. Signing is left to the keyring.

use bitcoin::absolute::LockTime;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{PublicKey, XOnlyPublicKey};
use bitcoin::transaction::Version;
use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::address::{p2sh_p2wpkh_redeem_script, parse_address, script_pubkey};
use super::utxo::{partition, FeeEstimator, TxShape, Utxo};
use crate::core::errors::WalletError;
use crate::core::network::{AddressType, Network};

/// Who bears the transaction fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePayer {
    /// Fee is added on top of the payment; leftover returns as change.
    #[default]
    Sender,
    /// Fee is taken out of the payment output.
    Receiver,
}

/// Spending account: its script type and public key.
#[derive(Debug, Clone)]
pub struct SenderAccount {
    pub address_type: AddressType,
    pub public_key: PublicKey,
}

impl SenderAccount {
    pub fn script_pubkey(&self) -> Result<ScriptBuf, WalletError> {
        script_pubkey(self.address_type, &self.public_key)
    }
}

/// Payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinTransfer {
    pub to_address: String,
    /// Satoshis
    pub amount: u64,
    #[serde(default)]
    pub fee_payer: FeePayer,
}

/// Unsigned transfer plus its accounting.
#[derive(Debug, Clone)]
pub struct CoinTransferPlan {
    pub psbt: Psbt,
    pub payment: u64,
    pub fee: u64,
    pub change: Option<u64>,
    pub selected: Vec<Utxo>,
}

/// Builds coin transfers for one network.
pub struct CoinTransferBuilder<E: FeeEstimator> {
    network: Network,
    dust_floor: u64,
    estimator: E,
}

impl<E: FeeEstimator> CoinTransferBuilder<E> {
    pub fn new(network: Network, dust_floor: u64, estimator: E) -> Result<Self, WalletError> {
        network.require_bitcoin()?;
        Ok(Self {
            network,
            dust_floor,
            estimator,
        })
    }

    fn estimate(&self, selected: &[Utxo], output_scripts: &[&ScriptBuf]) -> Result<u64, WalletError> {
        let shape = TxShape {
            inputs: selected.iter().map(|u| u.address_type).collect(),
            output_script_lens: output_scripts.iter().map(|s| s.len()).collect(),
        };
        self.estimator.estimate(&shape)
    }

    pub fn build(
        &self,
        sender: &SenderAccount,
        utxos: &[Utxo],
        transfer: &CoinTransfer,
    ) -> Result<CoinTransferPlan, WalletError> {
        info!(
            "building coin transfer: amount={} sat, payer={:?}, candidates={}",
            transfer.amount,
            transfer.fee_payer,
            utxos.len()
        );
        if transfer.amount < self.dust_floor {
            return Err(WalletError::InvalidInput(format!(
                "amount {} is below the dust floor {}",
                transfer.amount, self.dust_floor
            )));
        }

        let (plain, attached) = partition(utxos);
        if !attached.is_empty() {
            debug!("skipping {} attachment-bearing UTXOs", attached.len());
        }
        if plain.is_empty() {
            return Err(WalletError::InsufficientBalance("no plain UTXO available".to_string()));
        }

        let recipient = parse_address(&transfer.to_address, self.network)?.script_pubkey();
        let change_script = sender.script_pubkey()?;

        let plan = match transfer.fee_payer {
            FeePayer::Sender => self.sender_pays(&plain, transfer.amount, &recipient, &change_script)?,
            FeePayer::Receiver => self.receiver_pays(&plain, transfer.amount, &recipient, &change_script)?,
        };
        let (selected, payment, fee, change) = plan;

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(payment),
            script_pubkey: recipient,
        }];
        if let Some(change) = change {
            outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: change_script.clone(),
            });
        }

        let psbt = self.unsigned_psbt(sender, &selected, outputs, &change_script)?;
        debug!(
            "✅ transfer planned: inputs={}, payment={}, fee={}, change={:?}",
            selected.len(),
            payment,
            fee,
            change
        );
        Ok(CoinTransferPlan {
            psbt,
            payment,
            fee,
            change,
            selected,
        })
    }

    /// Add inputs until `amount` is covered, then until `amount + fee` is, re-estimating
    /// the fee after each input. Stops once funded or out of UTXOs.
    fn select(
        &self,
        plain: &[Utxo],
        amount: u64,
        include_fee: bool,
        outputs: &[&ScriptBuf],
    ) -> Result<(Vec<Utxo>, u64, u64), WalletError> {
        let mut selected = Vec::new();
        let mut total = 0u64;
        let mut fee = 0u64;

        for utxo in plain {
            selected.push(utxo.clone());
            total = total
                .checked_add(utxo.value)
                .ok_or_else(|| WalletError::InvalidInput("UTXO value sum overflows".to_string()))?;
            if total < amount {
                continue;
            }
            fee = self.estimate(&selected, outputs)?;
            let target = if include_fee { amount.saturating_add(fee) } else { amount };
            if total >= target {
                return Ok((selected, total, fee));
            }
        }

        Err(WalletError::InsufficientBalance(format!(
            "inputs {} cannot cover {} plus fee {}",
            total, amount, fee
        )))
    }

    fn sender_pays(
        &self,
        plain: &[Utxo],
        amount: u64,
        recipient: &ScriptBuf,
        change_script: &ScriptBuf,
    ) -> Result<(Vec<Utxo>, u64, u64, Option<u64>), WalletError> {
        let (selected, total, fee_without_change) = self.select(plain, amount, true, &[recipient])?;

        let fee_with_change = self.estimate(&selected, &[recipient, change_script])?;
        let change = total
            .checked_sub(amount)
            .and_then(|left| left.checked_sub(fee_with_change))
            .filter(|change| *change >= self.dust_floor);

        match change {
            Some(change) => Ok((selected, amount, fee_with_change, Some(change))),
            None => {
                // surplus below the dust floor goes to the fee
                let fee = total - amount;
                debug!(
                    "change dropped below dust floor, fee {} -> {}",
                    fee_without_change, fee
                );
                Ok((selected, amount, fee, None))
            }
        }
    }

    fn receiver_pays(
        &self,
        plain: &[Utxo],
        amount: u64,
        recipient: &ScriptBuf,
        change_script: &ScriptBuf,
    ) -> Result<(Vec<Utxo>, u64, u64, Option<u64>), WalletError> {
        let (selected, total, _) = self.select(plain, amount, false, &[recipient])?;

        let surplus = total - amount;
        let fee_without_change = self.estimate(&selected, &[recipient])?;

        let (payment, change) = if surplus <= fee_without_change {
            // surplus already pays part of the fee; no change output
            debug!("surplus {} absorbed by fee {}", surplus, fee_without_change);
            (total.checked_sub(fee_without_change), None)
        } else if surplus >= self.dust_floor {
            let fee = self.estimate(&selected, &[recipient, change_script])?;
            (amount.checked_sub(fee), Some(surplus))
        } else {
            (amount.checked_sub(fee_without_change), None)
        };

        let payment = payment.filter(|p| *p >= self.dust_floor).ok_or_else(|| {
            WalletError::InsufficientBalance(format!(
                "payment {} cannot absorb fee {}",
                amount, fee_without_change
            ))
        })?;
        let paid_fee = total - payment - change.unwrap_or(0);
        Ok((selected, payment, paid_fee, change))
    }

    fn unsigned_psbt(
        &self,
        sender: &SenderAccount,
        selected: &[Utxo],
        outputs: Vec<TxOut>,
        sender_script: &ScriptBuf,
    ) -> Result<Psbt, WalletError> {
        let input = selected
            .iter()
            .map(|utxo| {
                Ok(TxIn {
                    previous_output: utxo.outpoint()?,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
            })
            .collect::<Result<Vec<_>, WalletError>>()?;

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output: outputs,
        };
        let mut psbt = Psbt::from_unsigned_tx(tx)
            .map_err(|e| WalletError::TransactionFailed(format!("PSBT: {}", e)))?;

        for (psbt_input, utxo) in psbt.inputs.iter_mut().zip(selected) {
            let spent = utxo.tx_out()?;
            let owned = spent.script_pubkey == *sender_script;
            psbt_input.witness_utxo = Some(spent);
            if !owned {
                continue;
            }
            match sender.address_type {
                AddressType::P2shP2wpkh => {
                    psbt_input.redeem_script = Some(p2sh_p2wpkh_redeem_script(&sender.public_key)?);
                }
                AddressType::P2tr => {
                    psbt_input.tap_internal_key = Some(XOnlyPublicKey::from(sender.public_key));
                }
                _ => {}
            }
        }
        Ok(psbt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::bitcoin::address;
    use crate::blockchain::bitcoin::utxo::{FixedFeeEstimator, Inscription, VsizeFeeEstimator};
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use pretty_assertions::assert_eq;

    fn sender(address_type: AddressType) -> SenderAccount {
        let secp = Secp256k1::new();
        SenderAccount {
            address_type,
            public_key: PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[0x21; 32]).unwrap()),
        }
    }

    fn recipient() -> String {
        let secp = Secp256k1::new();
        let pk = PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[0x22; 32]).unwrap());
        address::address(AddressType::P2wpkh, &pk, Network::Bitcoin).unwrap()
    }

    fn utxos(account: &SenderAccount, values: &[u64]) -> Vec<Utxo> {
        let script = account.script_pubkey().unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, value)| Utxo {
                txid: format!("{:064x}", i + 1),
                vout: 0,
                value: *value,
                script_pubkey: hex::encode(script.as_bytes()),
                address: String::new(),
                address_type: account.address_type,
                inscriptions: Vec::new(),
            })
            .collect()
    }

    fn transfer(amount: u64, fee_payer: FeePayer) -> CoinTransfer {
        CoinTransfer {
            to_address: recipient(),
            amount,
            fee_payer,
        }
    }

    #[test]
    fn test_two_utxo_sender_pays_scenario() {
        let account = sender(AddressType::P2wpkh);
        let builder = CoinTransferBuilder::new(Network::Bitcoin, 546, FixedFeeEstimator(1_500)).unwrap();
        let plan = builder
            .build(&account, &utxos(&account, &[50_000, 30_000]), &transfer(60_000, FeePayer::Sender))
            .unwrap();

        assert_eq!(plan.selected.len(), 2);
        assert_eq!(plan.change, Some(18_500));
        assert_eq!(plan.fee, 1_500);
        let outputs: Vec<u64> = plan.psbt.unsigned_tx.output.iter().map(|o| o.value.to_sat()).collect();
        assert_eq!(outputs, vec![60_000, 18_500]);
        assert_eq!(outputs.iter().sum::<u64>() + plan.fee, 80_000);
        assert!(plan.psbt.inputs.iter().all(|i| i.witness_utxo.is_some()));
    }

    #[test]
    fn test_sub_dust_change_is_dropped() {
        let account = sender(AddressType::P2wpkh);
        let builder = CoinTransferBuilder::new(Network::Bitcoin, 546, FixedFeeEstimator(1_500)).unwrap();

        let above = builder
            .build(&account, &utxos(&account, &[62_100]), &transfer(60_000, FeePayer::Sender))
            .unwrap();
        let below = builder
            .build(&account, &utxos(&account, &[61_900]), &transfer(60_000, FeePayer::Sender))
            .unwrap();

        assert_eq!(above.psbt.unsigned_tx.output.len(), 2);
        assert_eq!(below.psbt.unsigned_tx.output.len(), 1);
        assert_eq!(below.change, None);
        assert_eq!(below.fee, 1_900);
    }

    #[test]
    fn test_receiver_pays_amount_plus_fee_has_no_change() {
        let account = sender(AddressType::P2wpkh);
        let builder = CoinTransferBuilder::new(Network::Bitcoin, 546, FixedFeeEstimator(1_500)).unwrap();
        let plan = builder
            .build(&account, &utxos(&account, &[61_500]), &transfer(60_000, FeePayer::Receiver))
            .unwrap();

        assert_eq!(plan.change, None);
        assert_eq!(plan.fee, 1_500);
        assert_eq!(plan.payment, 60_000);
        let outputs: Vec<u64> = plan.psbt.unsigned_tx.output.iter().map(|o| o.value.to_sat()).collect();
        assert_eq!(outputs, vec![60_000]);
    }

    #[test]
    fn test_receiver_pays_exact_amount_shrinks_payment() {
        let account = sender(AddressType::P2wpkh);
        let builder = CoinTransferBuilder::new(Network::Bitcoin, 546, FixedFeeEstimator(1_500)).unwrap();
        let plan = builder
            .build(&account, &utxos(&account, &[60_000, 1_500]), &transfer(60_000, FeePayer::Receiver))
            .unwrap();

        assert_eq!(plan.selected.len(), 1);
        assert_eq!(plan.change, None);
        assert_eq!(plan.payment, 58_500);
        assert_eq!(plan.psbt.unsigned_tx.output.len(), 1);
    }

    #[test]
    fn test_receiver_pays_large_surplus_keeps_change() {
        let account = sender(AddressType::P2wpkh);
        let builder = CoinTransferBuilder::new(Network::Bitcoin, 546, FixedFeeEstimator(1_500)).unwrap();
        let plan = builder
            .build(&account, &utxos(&account, &[65_000]), &transfer(60_000, FeePayer::Receiver))
            .unwrap();

        assert_eq!(plan.change, Some(5_000));
        assert_eq!(plan.payment, 58_500);
        assert_eq!(plan.fee, 1_500);
    }

    #[test]
    fn test_inscribed_utxos_are_not_spent() {
        let account = sender(AddressType::P2tr);
        let mut candidates = utxos(&account, &[100_000, 20_000]);
        candidates[0].inscriptions.push(Inscription {
            inscription_id: "i0".to_string(),
            offset: 0,
        });
        let builder = CoinTransferBuilder::new(Network::Bitcoin, 546, FixedFeeEstimator(500)).unwrap();
        let plan = builder
            .build(&account, &candidates, &transfer(10_000, FeePayer::Sender))
            .unwrap();
        assert_eq!(plan.selected.len(), 1);
        assert_eq!(plan.selected[0].value, 20_000);
        assert!(plan.psbt.inputs[0].tap_internal_key.is_some());
    }

    #[test]
    fn test_insufficient_balance() {
        let account = sender(AddressType::P2wpkh);
        let builder = CoinTransferBuilder::new(Network::Bitcoin, 546, FixedFeeEstimator(1_500)).unwrap();
        assert!(matches!(
            builder.build(&account, &utxos(&account, &[30_000, 30_000]), &transfer(60_000, FeePayer::Sender)),
            Err(WalletError::InsufficientBalance(_))
        ));
        assert!(matches!(
            builder.build(&account, &[], &transfer(1_000, FeePayer::Sender)),
            Err(WalletError::InsufficientBalance(_))
        ));
    }

    #[test]
    fn test_vsize_estimator_fee_tracks_inputs() {
        let account = sender(AddressType::P2shP2wpkh);
        let builder =
            CoinTransferBuilder::new(Network::Bitcoin, 546, VsizeFeeEstimator::new(10.0).unwrap()).unwrap();
        let plan = builder
            .build(&account, &utxos(&account, &[5_000, 5_000, 50_000]), &transfer(12_000, FeePayer::Sender))
            .unwrap();
        assert_eq!(plan.selected.len(), 3);
        let inputs: u64 = plan.selected.iter().map(|u| u.value).sum();
        let outputs: u64 = plan.psbt.unsigned_tx.output.iter().map(|o| o.value.to_sat()).sum();
        assert_eq!(inputs - outputs, plan.fee);
        assert!(plan.psbt.inputs.iter().all(|i| i.redeem_script.is_some()));
    }

    #[test]
    fn test_rejects_cell_network() {
        assert!(CoinTransferBuilder::new(Network::Ckb, 546, FixedFeeEstimator(1)).is_err());
    }
}
