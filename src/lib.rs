#![allow(clippy::doc_lazy_continuation)]
// src/lib.rs

pub mod blockchain;
pub mod cli;
pub mod core;
pub mod crypto;
pub mod security;
pub mod storage;

// Hardware wallet delegation seam
pub mod hardware;

pub use crate::core::errors::WalletError;
pub use crate::core::keyring::Keyring;
