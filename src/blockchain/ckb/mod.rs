//! Nervos CKB (cell model) support
//!
//! - secp256k1-blake160 lock scripts and full-format addresses
//! - blake2b hashing with the chain personalization
//! - transaction skeletons, witness packing and capacity transfers

pub mod address;
pub mod hash;
pub mod skeleton;
pub mod transfer;

pub use address::{encode_address, lock_from_public_key, parse_address};
pub use skeleton::{LiveCell, SigningEntry, TransactionSkeleton};
pub use transfer::{CkbTransferBuilder, CkbTransferPlan};
