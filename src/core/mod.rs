pub mod config;
pub mod errors;
pub mod hd_path;
pub mod key_material;
pub mod keyring;
pub mod network;

// 重新导出关键结构
pub use errors::WalletError;
pub use key_material::{KeyCapabilities, KeyMaterial};
pub use keyring::Keyring;
