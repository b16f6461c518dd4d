//! UTXO 管理
//!
//! UTXO model, plain/attachment partitioning and fee estimation for the
//! coin-transfer builder.

use bitcoin::{OutPoint, ScriptBuf, TxOut, Txid};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::errors::WalletError;
use crate::core::network::AddressType;

/// Attachment carried by a UTXO (an inscription); such outputs are never spent as plain value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inscription {
    pub inscription_id: String,
    #[serde(default)]
    pub offset: u64,
}

/// UTXO 结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// transaction ID (hex, display order)
    pub txid: String,
    /// 输出索引
    pub vout: u32,
    /// 金额（satoshi）
    pub value: u64,
    /// 脚本公钥 (hex)
    pub script_pubkey: String,
    pub address: String,
    pub address_type: AddressType,
    #[serde(default)]
    pub inscriptions: Vec<Inscription>,
}

impl Utxo {
    pub fn txid(&self) -> Result<Txid, WalletError> {
        Txid::from_str(&self.txid)
            .map_err(|e| WalletError::InvalidInput(format!("invalid txid {}: {}", self.txid, e)))
    }

    pub fn outpoint(&self) -> Result<OutPoint, WalletError> {
        Ok(OutPoint {
            txid: self.txid()?,
            vout: self.vout,
        })
    }

    pub fn script(&self) -> Result<ScriptBuf, WalletError> {
        ScriptBuf::from_hex(&self.script_pubkey)
            .map_err(|e| WalletError::InvalidInput(format!("invalid script pubkey: {}", e)))
    }

    pub fn tx_out(&self) -> Result<TxOut, WalletError> {
        Ok(TxOut {
            value: bitcoin::Amount::from_sat(self.value),
            script_pubkey: self.script()?,
        })
    }

    pub fn is_plain(&self) -> bool {
        self.inscriptions.is_empty()
    }
}

/// Split candidates into (plain, attachment-bearing), preserving order.
pub fn partition(utxos: &[Utxo]) -> (Vec<Utxo>, Vec<Utxo>) {
    utxos.iter().cloned().partition(Utxo::is_plain)
}

/// Sum of UTXO values with overflow checking; provider data is untrusted.
pub fn checked_total(utxos: &[Utxo]) -> Result<u64, WalletError> {
    utxos.iter().try_fold(0u64, |acc, u| {
        acc.checked_add(u.value)
            .ok_or_else(|| WalletError::InvalidInput("UTXO value sum overflows".to_string()))
    })
}

/// Shape of a transaction for fee estimation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxShape {
    pub inputs: Vec<AddressType>,
    /// Script pubkey length of every output.
    pub output_script_lens: Vec<usize>,
}

/// Fee estimation seam used by the coin-transfer builder.
pub trait FeeEstimator {
    /// Fee in satoshis for a transaction of the given shape.
    fn estimate(&self, shape: &TxShape) -> Result<u64, WalletError>;
}

/// Weight-based estimate multiplied by a sat/vB rate.
#[derive(Debug, Clone, Copy)]
pub struct VsizeFeeEstimator {
    pub fee_rate: f64,
}

impl VsizeFeeEstimator {
    pub fn new(fee_rate: f64) -> Result<Self, WalletError> {
        if fee_rate.is_nan() || fee_rate <= 0.0 {
            return Err(WalletError::InvalidInput(format!("fee rate {} must be positive", fee_rate)));
        }
        Ok(Self { fee_rate })
    }

    /// Input weight including the witness, in weight units.
    fn input_weight(address_type: AddressType) -> u64 {
        match address_type {
            AddressType::P2pkh => 592,
            AddressType::P2shP2wpkh => 364,
            AddressType::P2wpkh => 272,
            AddressType::P2tr => 230,
            // not spendable here, counted like P2PKH
            AddressType::CkbSecp256k1 => 592,
        }
    }

    pub fn vsize(shape: &TxShape) -> u64 {
        let has_witness = shape.inputs.iter().any(|t| *t != AddressType::P2pkh);
        // version + locktime + in/out counts
        let mut weight: u64 = (4 + 4 + 1 + 1) * 4;
        if has_witness {
            weight += 2; // marker + flag
        }
        weight += shape.inputs.iter().map(|t| Self::input_weight(*t)).sum::<u64>();
        weight += shape
            .output_script_lens
            .iter()
            .map(|len| (8 + 1 + *len as u64) * 4)
            .sum::<u64>();
        (weight + 3) / 4
    }
}

impl FeeEstimator for VsizeFeeEstimator {
    fn estimate(&self, shape: &TxShape) -> Result<u64, WalletError> {
        let fee = (Self::vsize(shape) as f64 * self.fee_rate).ceil();
        if !fee.is_finite() || fee > u64::MAX as f64 {
            return Err(WalletError::InvalidInput("fee estimate out of range".to_string()));
        }
        Ok(fee as u64)
    }
}

/// Constant fee regardless of shape.
#[derive(Debug, Clone, Copy)]
pub struct FixedFeeEstimator(pub u64);

impl FeeEstimator for FixedFeeEstimator {
    fn estimate(&self, _shape: &TxShape) -> Result<u64, WalletError> {
        Ok(self.0)
    }
}
