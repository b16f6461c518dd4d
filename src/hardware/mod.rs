//! 硬件wallet集成模块
//!
//! Remote-device wallets keep their keys on the device. The keyring forwards
//! public-key and PSBT-signing requests for them to a [`HardwareDevice`].

use async_trait::async_trait;
use bitcoin::psbt::Psbt;

use crate::blockchain::bitcoin::signer::SignInput;
use crate::core::errors::WalletError;
use crate::core::hd_path::HdPath;
use crate::core::key_material::DeviceDescriptor;

#[async_trait]
pub trait HardwareDevice: Send + Sync {
    /// Compressed public key hex at `path`.
    async fn get_public_key(&self, device: &DeviceDescriptor, path: &HdPath) -> Result<String, WalletError>;

    /// Sign `inputs` on the device and return the updated PSBT.
    async fn sign_psbt(
        &self,
        device: &DeviceDescriptor,
        psbt: Psbt,
        inputs: &[SignInput],
    ) -> Result<Psbt, WalletError>;
}
