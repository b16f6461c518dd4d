//! Bitcoin 区块链集成模块
//!
//! - P2PKH / P2SH-P2WPKH / P2WPKH / P2TR addresses
//! - ECDSA and Schnorr PSBT signing
//! - BIP-322 simple message signatures
//! - UTXO 管理 and coin-transfer construction

pub mod address;
pub mod bip322;
pub mod signer;
pub mod transaction;
pub mod utxo;

pub use address::AddressDescriptor;
pub use signer::{PartialSignature, SignInput};
pub use transaction::{CoinTransfer, CoinTransferBuilder, CoinTransferPlan, FeePayer, SenderAccount};
pub use utxo::{FeeEstimator, FixedFeeEstimator, Utxo, VsizeFeeEstimator};
