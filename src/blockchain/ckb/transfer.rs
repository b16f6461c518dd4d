//! Cell-chain capacity transfer builder

use ckb_types::bytes::Bytes;
use ckb_types::core::{Capacity, TransactionView};
use ckb_types::packed::{CellOutput, Script};
use ckb_types::prelude::*;
use tracing::{debug, info, warn};

use super::address::secp256k1_cell_dep;
use super::skeleton::{
    checked_capacity_sum, pack_lock_witness, prepare_signing_entry, seal, LiveCell, SigningEntry,
    TransactionSkeleton,
};
use crate::core::config::CkbBuilderConfig;
use crate::core::errors::WalletError;
use crate::core::network::Network;

/// Outcome of [`CkbTransferBuilder::build`].
#[derive(Debug, Clone)]
pub struct CkbTransferPlan {
    pub skeleton: TransactionSkeleton,
    pub sender_entry: SigningEntry,
    pub change: Option<u64>,
}

/// Minimum capacity (shannons) a data-less `output` occupies on chain.
pub fn occupied_capacity(output: &CellOutput) -> Result<u64, WalletError> {
    output
        .occupied_capacity(Capacity::zero())
        .map(|c| c.as_u64())
        .map_err(|e| WalletError::InvalidInput(format!("occupied capacity: {:?}", e)))
}

/// Builds a single-recipient capacity transfer from plain sender cells.
pub struct CkbTransferBuilder {
    network: Network,
    config: CkbBuilderConfig,
}

impl CkbTransferBuilder {
    pub fn new(network: Network, config: CkbBuilderConfig) -> Result<Self, WalletError> {
        if !network.is_ckb() {
            return Err(WalletError::InvalidNetwork(format!(
                "{} is not a cell-chain network",
                network
            )));
        }
        Ok(Self { network, config })
    }

    /// Select cells until `amount + fee_reserve` is covered and the leftover is
    /// either zero or enough for a change cell, then lay out the transfer and
    /// change outputs and reserve the sender witness.
    ///
    /// A transfer below its cell's occupied capacity fails `InvalidInput`. When the
    /// sender runs out of cells with an undersized change, `strict_change_capacity`
    /// decides between `InsufficientBalance` and emitting it with a warning.
    pub fn build(
        &self,
        sender_lock: &Script,
        cells: &[LiveCell],
        to_lock: Script,
        amount: u64,
    ) -> Result<CkbTransferPlan, WalletError> {
        info!(
            "building cell-chain transfer: amount={} shannons, candidates={}",
            amount,
            cells.len()
        );
        if amount == 0 {
            return Err(WalletError::InvalidInput("transfer amount must be positive".to_string()));
        }

        let transfer_output = CellOutput::new_builder()
            .capacity(amount.pack())
            .lock(to_lock)
            .build();
        let min_transfer = occupied_capacity(&transfer_output)?;
        if amount < min_transfer {
            return Err(WalletError::InvalidInput(format!(
                "transfer of {} shannons is below the {} shannons its cell occupies",
                amount, min_transfer
            )));
        }
        let min_change = occupied_capacity(&CellOutput::new_builder().lock(sender_lock.clone()).build())?;

        let required = amount
            .checked_add(self.config.fee_reserve)
            .ok_or_else(|| WalletError::InvalidInput("amount overflows".to_string()))?;
        // funded, and the leftover is either nothing or a valid change cell
        let settled = |total: u64| total >= required && (total == required || total - required >= min_change);

        let mut selected = Vec::new();
        let mut total = 0u64;
        for cell in cells
            .iter()
            .filter(|c| c.is_plain() && c.lock.as_slice() == sender_lock.as_slice())
        {
            if settled(total) {
                break;
            }
            total = checked_capacity_sum([total, cell.capacity].into_iter())?;
            selected.push(cell.clone());
        }
        if total < required {
            return Err(WalletError::InsufficientBalance(format!(
                "need {} shannons, sender cells hold {}",
                required, total
            )));
        }

        let leftover = total - required;
        if !settled(total) {
            if self.config.strict_change_capacity {
                return Err(WalletError::InsufficientBalance(format!(
                    "change of {} shannons is below the {} shannons its cell occupies",
                    leftover, min_change
                )));
            }
            warn!(
                "change of {} shannons is below the {} shannons its cell occupies",
                leftover, min_change
            );
        }

        let mut skeleton = TransactionSkeleton {
            cell_deps: vec![secp256k1_cell_dep(self.network)?],
            inputs: selected,
            ..Default::default()
        };
        skeleton.push_output(transfer_output, Bytes::new());

        let change = if leftover > 0 {
            skeleton.push_output(
                CellOutput::new_builder()
                    .capacity(leftover.pack())
                    .lock(sender_lock.clone())
                    .build(),
                Bytes::new(),
            );
            Some(leftover)
        } else {
            None
        };

        pack_lock_witness(&mut skeleton, sender_lock)?;
        while skeleton.witnesses.len() < skeleton.inputs.len() {
            skeleton.witnesses.push(Bytes::new());
        }
        let sender_entry = prepare_signing_entry(&mut skeleton, sender_lock)?;

        debug!(
            "✅ transfer skeleton ready: inputs={}, outputs={}, change={:?}",
            skeleton.inputs.len(),
            skeleton.outputs.len(),
            change
        );
        Ok(CkbTransferPlan {
            skeleton,
            sender_entry,
            change,
        })
    }
}

/// Sign the sender entry with `sign_recoverable` (digest hex in, `0x` signature hex out)
/// and seal the transaction.
pub fn sign_and_seal<F>(plan: &CkbTransferPlan, sign_recoverable: F) -> Result<TransactionView, WalletError>
where
    F: Fn(&str) -> Result<String, WalletError>,
{
    let signature_hex = sign_recoverable(&plan.sender_entry.message)?;
    let signature = hex::decode(signature_hex.trim_start_matches("0x"))?;
    seal(&plan.skeleton, &[(plan.sender_entry.index, signature)])
}
