//! Cell-chain transaction skeleton, witness packing and sealing
//!
//! The skeleton keeps the transaction's parallel arrays as plain growable vectors.
//! Witness packing reserves a 65-byte lock placeholder in the first witness of the
//! sender's lock group; sealing copies the witnesses, writes the signature into that
//! slot and builds the final [`TransactionView`] without touching the skeleton.

use ckb_hash::new_blake2b;
use ckb_types::bytes::Bytes;
use ckb_types::core::{TransactionBuilder, TransactionView};
use ckb_types::packed::{self, Byte32, CellDep, CellInput, CellOutput, OutPoint, Script, WitnessArgs};
use ckb_types::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::core::errors::WalletError;
use crate::crypto::signature_utils::RECOVERABLE_SIGNATURE_LEN;

/// A live cell as reported by the cell provider.
#[derive(Debug, Clone)]
pub struct LiveCell {
    pub out_point: OutPoint,
    pub capacity: u64,
    pub lock: Script,
    pub type_script: Option<Script>,
    pub data: Bytes,
}

impl LiveCell {
    /// Plain capacity cell: no type script and no data.
    pub fn is_plain(&self) -> bool {
        self.type_script.is_none() && self.data.is_empty()
    }

    pub fn output(&self) -> CellOutput {
        CellOutput::new_builder()
            .capacity(self.capacity.pack())
            .lock(self.lock.clone())
            .type_(self.type_script.clone().pack())
            .build()
    }
}

/// Digest a key has to sign so its lock group can be unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningEntry {
    /// Index of the witness that receives the signature.
    pub index: usize,
    /// `0x`-prefixed 32-byte digest.
    pub message: String,
}

/// Unsigned cell-chain transaction under construction.
#[derive(Debug, Clone, Default)]
pub struct TransactionSkeleton {
    pub cell_deps: Vec<CellDep>,
    pub header_deps: Vec<Byte32>,
    pub inputs: Vec<LiveCell>,
    pub outputs: Vec<CellOutput>,
    pub outputs_data: Vec<Bytes>,
    pub witnesses: Vec<Bytes>,
    pub signing_entries: Vec<SigningEntry>,
}

impl TransactionSkeleton {
    pub fn push_output(&mut self, output: CellOutput, data: Bytes) {
        self.outputs.push(output);
        self.outputs_data.push(data);
    }

    /// Input indices whose lock equals `lock`, in order.
    pub fn lock_group(&self, lock: &Script) -> Vec<usize> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.lock.as_slice() == lock.as_slice())
            .map(|(i, _)| i)
            .collect()
    }

    /// Build the transaction view with the given witnesses.
    pub fn to_view_with_witnesses(&self, witnesses: &[Bytes]) -> TransactionView {
        TransactionBuilder::default()
            .cell_deps(self.cell_deps.iter().cloned())
            .header_deps(self.header_deps.iter().cloned())
            .inputs(
                self.inputs
                    .iter()
                    .map(|cell| CellInput::new(cell.out_point.clone(), 0)),
            )
            .outputs(self.outputs.iter().cloned())
            .outputs_data(self.outputs_data.iter().map(|d| d.pack()))
            .witnesses(witnesses.iter().map(|w| w.pack()))
            .build()
    }

    pub fn to_view(&self) -> TransactionView {
        self.to_view_with_witnesses(&self.witnesses)
    }

    /// Hash of the transaction without witnesses.
    pub fn tx_hash(&self) -> Byte32 {
        self.to_view().hash()
    }

    pub fn input_capacity(&self) -> Result<u64, WalletError> {
        checked_capacity_sum(self.inputs.iter().map(|c| c.capacity))
    }

    pub fn output_capacity(&self) -> Result<u64, WalletError> {
        checked_capacity_sum(self.outputs.iter().map(|o| {
            let capacity: u64 = o.capacity().unpack();
            capacity
        }))
    }
}

pub(crate) fn checked_capacity_sum(mut values: impl Iterator<Item = u64>) -> Result<u64, WalletError> {
    values.try_fold(0u64, |acc, v| {
        acc.checked_add(v)
            .ok_or_else(|| WalletError::InvalidInput("capacity sum overflows".to_string()))
    })
}

fn lock_placeholder() -> Bytes {
    Bytes::from(vec![0u8; RECOVERABLE_SIGNATURE_LEN])
}

/// Reserve the lock placeholder in the first witness of `lock`'s group.
///
/// Pads the witness vector with empty entries up to that input, then writes or
/// merges a `WitnessArgs` whose lock is 65 zero bytes. Existing `input_type` and
/// `output_type` fields are kept. Returns the witness index.
pub fn pack_lock_witness(skeleton: &mut TransactionSkeleton, lock: &Script) -> Result<usize, WalletError> {
    let index = skeleton
        .lock_group(lock)
        .first()
        .copied()
        .ok_or_else(|| WalletError::AccountNotFound("no input is locked by the sender".to_string()))?;

    while skeleton.witnesses.len() <= index {
        skeleton.witnesses.push(Bytes::new());
    }

    let placeholder = lock_placeholder();
    let current = &skeleton.witnesses[index];
    let witness_args = if current.is_empty() {
        WitnessArgs::new_builder()
            .lock(Some(placeholder).pack())
            .build()
    } else {
        let existing = WitnessArgs::from_slice(current)
            .map_err(|e| WalletError::TransactionFailed(format!("witness {} is not WitnessArgs: {}", index, e)))?;
        if let Some(existing_lock) = existing.lock().to_opt() {
            let raw = existing_lock.raw_data();
            if !raw.is_empty() && raw != placeholder {
                return Err(WalletError::LockFieldAlreadySet(format!("witness {}", index)));
            }
        }
        existing
            .as_builder()
            .lock(Some(placeholder).pack())
            .build()
    };

    skeleton.witnesses[index] = witness_args.as_bytes();
    debug!("lock placeholder reserved at witness {}", index);
    Ok(index)
}

/// secp256k1-blake160 sighash-all digest for `lock`'s group.
///
/// `blake2b(tx_hash || len(w0) || w0 || other group witnesses || witnesses past the inputs)`
/// with every length as a little-endian u64.
pub fn sighash_all_message(skeleton: &TransactionSkeleton, lock: &Script) -> Result<[u8; 32], WalletError> {
    let group = skeleton.lock_group(lock);
    let first = *group
        .first()
        .ok_or_else(|| WalletError::AccountNotFound("no input is locked by the sender".to_string()))?;
    let empty = Bytes::new();
    let witness_at = |i: usize| skeleton.witnesses.get(i).unwrap_or(&empty);

    let mut hasher = new_blake2b();
    hasher.update(skeleton.tx_hash().as_slice());

    let first_witness = witness_at(first);
    hasher.update(&(first_witness.len() as u64).to_le_bytes());
    hasher.update(first_witness);

    for &i in group.iter().skip(1) {
        let witness = witness_at(i);
        hasher.update(&(witness.len() as u64).to_le_bytes());
        hasher.update(witness);
    }
    for witness in skeleton.witnesses.iter().skip(skeleton.inputs.len()) {
        hasher.update(&(witness.len() as u64).to_le_bytes());
        hasher.update(witness);
    }

    let mut message = [0u8; 32];
    hasher.finalize(&mut message);
    Ok(message)
}

/// Record the signing entry for `lock`'s group. The placeholder must already be packed.
pub fn prepare_signing_entry(skeleton: &mut TransactionSkeleton, lock: &Script) -> Result<SigningEntry, WalletError> {
    let index = *skeleton
        .lock_group(lock)
        .first()
        .ok_or_else(|| WalletError::AccountNotFound("no input is locked by the sender".to_string()))?;
    let message = sighash_all_message(skeleton, lock)?;
    let entry = SigningEntry {
        index,
        message: format!("0x{}", hex::encode(message)),
    };
    skeleton.signing_entries.retain(|e| e.index != index);
    skeleton.signing_entries.push(entry.clone());
    Ok(entry)
}

/// Produce the sealed transaction.
///
/// `signatures` pairs a signing entry index with a 65-byte recoverable signature.
pub fn seal(skeleton: &TransactionSkeleton, signatures: &[(usize, Vec<u8>)]) -> Result<TransactionView, WalletError> {
    let mut witnesses = skeleton.witnesses.clone();
    for (index, signature) in signatures {
        if signature.len() != RECOVERABLE_SIGNATURE_LEN {
            return Err(WalletError::SigningFailed(format!(
                "signature for witness {} must be {} bytes",
                index, RECOVERABLE_SIGNATURE_LEN
            )));
        }
        let current = witnesses.get(*index).ok_or_else(|| {
            WalletError::TransactionFailed(format!("no witness reserved at {}", index))
        })?;
        let args = WitnessArgs::from_slice(current)
            .map_err(|e| WalletError::TransactionFailed(format!("witness {}: {}", index, e)))?;
        let sealed = args
            .as_builder()
            .lock(Some(Bytes::from(signature.clone())).pack())
            .build();
        witnesses[*index] = sealed.as_bytes();
    }
    Ok(skeleton.to_view_with_witnesses(&witnesses))
}

/// Lock field of a sealed `WitnessArgs` witness.
pub fn witness_lock(witness: &packed::Bytes) -> Result<Option<Bytes>, WalletError> {
    let args = WitnessArgs::from_slice(&witness.raw_data())
        .map_err(|e| WalletError::TransactionFailed(e.to_string()))?;
    Ok(args.lock().to_opt().map(|l| l.raw_data()))
}
