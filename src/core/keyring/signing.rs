use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{Keyring, Snapshot};
use crate::blockchain::bitcoin::signer::{self, PartialSignature, SignInput};
use crate::blockchain::bitcoin::{address as btc_address, bip322};
use crate::core::errors::WalletError;
use crate::core::hd_path::HdPath;
use crate::core::key_material::{KeyCapabilities, KeyMaterial};

/// How a to-sign input names its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSelector {
    Path(String),
    Address(String),
    PublicKey(String),
}

/// Caller-facing input to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToSignInput {
    pub index: usize,
    pub selector: InputSelector,
    #[serde(default)]
    pub sighash_type: Option<u32>,
}

impl ToSignInput {
    pub fn by_address(index: usize, address: &str) -> Self {
        Self {
            index,
            selector: InputSelector::Address(address.to_string()),
            sighash_type: None,
        }
    }
}

impl Keyring {
    fn resolve_path(&self, snapshot: &Snapshot, selector: &InputSelector) -> Result<HdPath, WalletError> {
        match selector {
            // raw keys have no path concept
            InputSelector::Path(_) if snapshot.key.is_simple_key() => Ok(HdPath::root()),
            InputSelector::Path(path) => HdPath::parse(path),
            InputSelector::Address(address) => self.path_for_address(snapshot, address),
            InputSelector::PublicKey(public_key) => self.path_for_public_key(snapshot, public_key),
        }
    }

    /// Resolve every selector before anything is signed.
    pub(crate) fn resolve_inputs(
        &self,
        snapshot: &Snapshot,
        inputs: &[ToSignInput],
    ) -> Result<Vec<SignInput>, WalletError> {
        inputs
            .iter()
            .map(|input| {
                Ok(SignInput {
                    index: input.index,
                    path: self.resolve_path(snapshot, &input.selector)?,
                    sighash_type: input.sighash_type,
                })
            })
            .collect()
    }

    fn optional_path(snapshot: &Snapshot, path: Option<&str>) -> Result<HdPath, WalletError> {
        match path {
            Some(_) if snapshot.key.is_simple_key() => Ok(HdPath::root()),
            Some(raw) => HdPath::parse(raw),
            None => Keyring::account_path(snapshot),
        }
    }

    /// Public key hex of the active account, asking the device for remote wallets.
    pub(crate) async fn public_key_at(&self, snapshot: &Snapshot, path: &HdPath) -> Result<String, WalletError> {
        if let (KeyMaterial::RemoteDevice(device), Some(hardware)) = (snapshot.key.as_ref(), &self.hardware) {
            return hardware.get_public_key(device.descriptor(), path).await;
        }
        snapshot.key.export_public_key(path)
    }

    /// Secret export of the active account (WIF or `0x` hex).
    pub fn export_account(&self, path: Option<&str>) -> Result<Zeroizing<String>, WalletError> {
        let snapshot = self.snapshot()?;
        let path = Self::optional_path(&snapshot, path)?;
        info!("exporting account at {}", path);
        snapshot.key.export_account(&path, snapshot.account.network)
    }

    /// Public key hex of the active account, or the device descriptor for devices
    /// when no hardware delegate is attached.
    pub async fn export_public_key(&self, path: Option<&str>) -> Result<String, WalletError> {
        let snapshot = self.snapshot()?;
        let path = Self::optional_path(&snapshot, path)?;
        self.public_key_at(&snapshot, &path).await
    }

    /// Address of the active account.
    pub async fn get_address(&self) -> Result<String, WalletError> {
        let snapshot = self.snapshot()?;
        self.address_of(&snapshot).await
    }

    pub(crate) async fn address_of(&self, snapshot: &Snapshot) -> Result<String, WalletError> {
        let path = Keyring::account_path(snapshot)?;
        let public_key_hex = self.public_key_at(snapshot, &path).await?;
        let public_key = PublicKey::from_str(&public_key_hex)
            .map_err(|e| WalletError::Unsupported(format!("no public key for this wallet: {}", e)))?;
        btc_address::address(snapshot.account.address_type, &public_key, snapshot.account.network)
    }

    pub fn sign_message(&self, text: &str) -> Result<String, WalletError> {
        let snapshot = self.snapshot()?;
        let path = Keyring::account_path(&snapshot)?;
        info!("signing message with {} on {}", path, snapshot.account.network);
        snapshot.key.sign_message(&path, text, snapshot.account.network)
    }

    pub fn sign_personal_message(&self, text: &str) -> Result<String, WalletError> {
        let snapshot = self.snapshot()?;
        let path = Keyring::account_path(&snapshot)?;
        snapshot.key.sign_personal_message(&path, text, snapshot.account.network)
    }

    /// Recoverable signature over a caller-supplied digest.
    pub fn sign_recoverable(&self, digest_hex: &str) -> Result<String, WalletError> {
        let snapshot = self.snapshot()?;
        let path = Keyring::account_path(&snapshot)?;
        snapshot.key.sign_recoverable(&path, digest_hex)
    }

    /// BIP-322 simple signature for the active account's address.
    pub async fn sign_bip322_simple(&self, text: &str) -> Result<String, WalletError> {
        let snapshot = self.snapshot()?;
        let network = snapshot.account.network;
        network.require_bitcoin()?;
        let address = self.address_of(&snapshot).await?;
        let path = Keyring::account_path(&snapshot)?;
        info!("BIP-322 signing for {}", address);
        bip322::sign_simple(snapshot.key.as_ref(), &path, &address, network, text)
    }

    /// Sign resolved inputs with the snapshotted key, on the device for remote wallets.
    pub(crate) async fn sign_resolved(
        &self,
        snapshot: &Snapshot,
        psbt: &mut Psbt,
        inputs: &[SignInput],
        finalize: bool,
    ) -> Result<Vec<PartialSignature>, WalletError> {
        if let KeyMaterial::RemoteDevice(device) = snapshot.key.as_ref() {
            let hardware = self.hardware.as_ref().ok_or_else(|| {
                WalletError::Unsupported("remote device wallet without a hardware delegate".to_string())
            })?;
            info!("forwarding {} inputs to device {}", inputs.len(), device.descriptor().device_id);
            *psbt = hardware.sign_psbt(device.descriptor(), psbt.clone(), inputs).await?;
            if finalize {
                signer::finalize_psbt(psbt)?;
            }
            return Ok(Vec::new());
        }

        if finalize {
            snapshot.key.sign_psbt(psbt, inputs)?;
            Ok(Vec::new())
        } else {
            snapshot.key.sign_inputs_without_finalizing(psbt, inputs)
        }
    }

    /// Sign the listed inputs and finalize the PSBT.
    pub async fn sign_psbt(&self, psbt: &mut Psbt, inputs: &[ToSignInput]) -> Result<(), WalletError> {
        let snapshot = self.snapshot()?;
        let resolved = self.resolve_inputs(&snapshot, inputs)?;
        info!("signing PSBT: {} of {} inputs", resolved.len(), psbt.inputs.len());
        self.sign_resolved(&snapshot, psbt, &resolved, true).await?;
        debug!("✅ PSBT signed and finalized");
        Ok(())
    }

    /// Sign the listed inputs and leave the PSBT open.
    pub async fn sign_inputs_without_finalizing(
        &self,
        psbt: &mut Psbt,
        inputs: &[ToSignInput],
    ) -> Result<Vec<PartialSignature>, WalletError> {
        let snapshot = self.snapshot()?;
        let resolved = self.resolve_inputs(&snapshot, inputs)?;
        self.sign_resolved(&snapshot, psbt, &resolved, false).await
    }

    /// Best effort: sign every input the active account can, one at a time.
    ///
    /// Failures are logged and skipped so a partial signature set still comes back.
    pub fn sign_psbt_with_default_account(&self, psbt: &mut Psbt) -> Vec<PartialSignature> {
        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("default-account signing skipped: {}", e);
                return Vec::new();
            }
        };
        let path = match Keyring::account_path(&snapshot) {
            Ok(path) => path,
            Err(e) => {
                warn!("default-account signing skipped: {}", e);
                return Vec::new();
            }
        };

        let mut signatures = Vec::new();
        for index in 0..psbt.inputs.len() {
            let input = SignInput::new(index, path.clone());
            match snapshot.key.sign_inputs_without_finalizing(psbt, &[input]) {
                Ok(mut signed) => signatures.append(&mut signed),
                Err(e) => warn!("input {} not signed with the default account: {}", index, e),
            }
        }
        signatures
    }
}
