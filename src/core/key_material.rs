//! Key material held by the keyring
//!
//! Three concrete kinds share one capability contract ([`KeyCapabilities`]):
//!
//! - [`SeedKey`]: a BIP32 seed; every call re-derives the node at the requested path
//! - [`RawKey`]: a single secp256k1 secret; the path is ignored
//! - [`RemoteDeviceKey`]: a hardware device descriptor; signing happens off-host
//!
//! The seed or raw secret only leaves this module through [`KeyCapabilities::serialize`].

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bitcoin::bip32::Xpriv;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};
use bitcoin::PrivateKey;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use crate::blockchain::bitcoin::signer::{self, PartialSignature, SignInput};
use crate::blockchain::ckb::hash as ckb_hash;
use crate::core::errors::WalletError;
use crate::core::hd_path::HdPath;
use crate::core::network::Network;
use crate::crypto::signature_utils;
use crate::security::redaction::redact_body;
use crate::security::secret::{vec_to_secret, SecretVec};

/// Capabilities every kind of key material offers.
///
/// Only [`KeyCapabilities::keypair`], [`KeyCapabilities::export_public_key`] and the
/// flags are kind-specific; everything else is built on top of the key pair, so a
/// kind without local keys fails every signing call with `Unsupported`.
pub trait KeyCapabilities {
    /// Key pair at `path`. Raw keys ignore the path.
    fn keypair(&self, path: &HdPath) -> Result<Keypair, WalletError>;

    /// Compressed public key hex at `path`.
    fn export_public_key(&self, path: &HdPath) -> Result<String, WalletError>;

    /// True only for raw keys, which have no path concept.
    fn is_simple_key(&self) -> bool;

    /// False only for the legacy seed import flavor whose base path keeps the
    /// mainnet coin type on test networks.
    fn is_network_base_hd_path(&self) -> bool;

    /// Persistable form.
    fn serialize(&self) -> SerializedKeyMaterial;

    /// WIF on UTXO networks, `0x` hex on the cell chain.
    fn export_account(&self, path: &HdPath, network: Network) -> Result<Zeroizing<String>, WalletError> {
        let keypair = self.keypair(path)?;
        let secret = keypair.secret_key();
        if network.is_ckb() {
            return Ok(Zeroizing::new(format!("0x{}", hex::encode(secret.secret_bytes()))));
        }
        let private_key = PrivateKey::new(secret, network.require_bitcoin()?);
        Ok(Zeroizing::new(private_key.to_wif()))
    }

    /// Recoverable ECDSA over the message digest for `network`.
    ///
    /// UTXO networks sign SHA-256 of the message and return base64; the cell chain
    /// signs its personal-message digest and returns `0x` hex.
    fn sign_message(&self, path: &HdPath, text: &str, network: Network) -> Result<String, WalletError> {
        let keypair = self.keypair(path)?;
        if network.is_ckb() {
            let digest = ckb_hash::personal_message_digest(text.as_bytes());
            let signature = signature_utils::sign_recoverable(&keypair.secret_key(), &digest);
            return Ok(format!("0x{}", hex::encode(signature)));
        }
        let digest = signature_utils::sha256_message_digest(text.as_bytes());
        let signature = signature_utils::sign_recoverable(&keypair.secret_key(), &digest);
        Ok(BASE64.encode(signature))
    }

    fn sign_personal_message(&self, path: &HdPath, text: &str, network: Network) -> Result<String, WalletError> {
        self.sign_message(path, text, network)
    }

    /// Sign a caller-supplied 32-byte digest; returns `0x` + 65-byte hex.
    fn sign_recoverable(&self, path: &HdPath, digest_hex: &str) -> Result<String, WalletError> {
        let digest = signature_utils::parse_digest_hex(digest_hex)?;
        let keypair = self.keypair(path)?;
        let signature = signature_utils::sign_recoverable(&keypair.secret_key(), &digest);
        Ok(format!("0x{}", hex::encode(signature)))
    }

    /// Sign the listed inputs and finalize the whole PSBT.
    fn sign_psbt(&self, psbt: &mut Psbt, inputs: &[SignInput]) -> Result<(), WalletError> {
        signer::sign_inputs(psbt, inputs, |path| self.keypair(path))?;
        signer::finalize_psbt(psbt)
    }

    /// Sign the listed inputs and leave the PSBT open for further rounds.
    fn sign_inputs_without_finalizing(
        &self,
        psbt: &mut Psbt,
        inputs: &[SignInput],
    ) -> Result<Vec<PartialSignature>, WalletError> {
        signer::sign_inputs(psbt, inputs, |path| self.keypair(path))
    }
}

/// Persisted shape of a wallet's key material.
///
/// Exactly one of `seed`, `private_key` or `connect_id` is expected to be present.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedKeyMaterial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_hex: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub legacy_hd_path: bool,
}

impl fmt::Debug for SerializedKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedKeyMaterial")
            .field("seed", &self.seed.as_deref().map(redact_body))
            .field("private_key", &self.private_key.as_deref().map(redact_body))
            .field("is_hex", &self.is_hex)
            .field("connect_id", &self.connect_id)
            .field("device_id", &self.device_id)
            .field("legacy_hd_path", &self.legacy_hd_path)
            .finish()
    }
}

/// Seed-backed key material.
pub struct SeedKey {
    seed: SecretVec,
    master: OnceCell<Xpriv>,
    network_base: bool,
}

impl SeedKey {
    pub fn from_seed(seed: &[u8], network_base: bool) -> Result<Self, WalletError> {
        if !(16..=64).contains(&seed.len()) {
            return Err(WalletError::InvalidPrivateKey(format!(
                "seed must be 16..=64 bytes, got {}",
                seed.len()
            )));
        }
        Ok(Self {
            seed: vec_to_secret(seed.to_vec()),
            master: OnceCell::new(),
            network_base,
        })
    }

    /// BIP39 phrase plus optional passphrase.
    pub fn from_mnemonic(phrase: &str, passphrase: &str, network_base: bool) -> Result<Self, WalletError> {
        let mnemonic = bip39::Mnemonic::parse_normalized(phrase)
            .map_err(|e| WalletError::MnemonicError(e.to_string()))?;
        let seed = Zeroizing::new(mnemonic.to_seed(passphrase));
        Self::from_seed(&seed[..], network_base)
    }

    fn master(&self) -> Result<&Xpriv, WalletError> {
        self.master.get_or_try_init(|| {
            debug!("building master node");
            // the network only affects xprv serialization, which is never exposed
            Xpriv::new_master(bitcoin::Network::Bitcoin, self.seed.as_slice())
                .map_err(|e| WalletError::InvalidPrivateKey(format!("master node: {}", e)))
        })
    }
}

impl KeyCapabilities for SeedKey {
    fn keypair(&self, path: &HdPath) -> Result<Keypair, WalletError> {
        let secp = Secp256k1::new();
        let derivation = path.to_derivation_path()?;
        let child = self
            .master()?
            .derive_priv(&secp, &derivation)
            .map_err(|e| WalletError::InvalidPath(format!("{}: {}", path, e)))?;
        Ok(Keypair::from_secret_key(&secp, &child.private_key))
    }

    fn export_public_key(&self, path: &HdPath) -> Result<String, WalletError> {
        Ok(hex::encode(self.keypair(path)?.public_key().serialize()))
    }

    fn is_simple_key(&self) -> bool {
        false
    }

    fn is_network_base_hd_path(&self) -> bool {
        self.network_base
    }

    fn serialize(&self) -> SerializedKeyMaterial {
        SerializedKeyMaterial {
            seed: Some(hex::encode(&*self.seed)),
            legacy_hd_path: !self.network_base,
            ..Default::default()
        }
    }
}

/// Single-key material imported from WIF or hex.
pub struct RawKey {
    secret: Zeroizing<[u8; 32]>,
    encoded: Zeroizing<String>,
    is_hex: bool,
    keypair: OnceCell<Keypair>,
}

impl RawKey {
    /// Accepts WIF or 32-byte hex (with or without `0x`).
    pub fn import(encoded: &str) -> Result<Self, WalletError> {
        let encoded = encoded.trim();
        if let Ok(wif) = PrivateKey::from_wif(encoded) {
            return Ok(Self {
                secret: Zeroizing::new(wif.inner.secret_bytes()),
                encoded: Zeroizing::new(encoded.to_string()),
                is_hex: false,
                keypair: OnceCell::new(),
            });
        }
        Self::from_hex(encoded)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, WalletError> {
        let raw = Zeroizing::new(
            hex::decode(encoded.trim_start_matches("0x"))
                .map_err(|_| WalletError::InvalidPrivateKey("neither WIF nor hex".to_string()))?,
        );
        let secret = SecretKey::from_slice(&raw)
            .map_err(|e| WalletError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self {
            secret: Zeroizing::new(secret.secret_bytes()),
            encoded: Zeroizing::new(encoded.to_string()),
            is_hex: true,
            keypair: OnceCell::new(),
        })
    }
}

impl KeyCapabilities for RawKey {
    fn keypair(&self, _path: &HdPath) -> Result<Keypair, WalletError> {
        self.keypair
            .get_or_try_init(|| {
                let secp = Secp256k1::new();
                Keypair::from_seckey_slice(&secp, &self.secret[..])
                    .map_err(|e| WalletError::InvalidPrivateKey(e.to_string()))
            })
            .copied()
    }

    fn export_public_key(&self, path: &HdPath) -> Result<String, WalletError> {
        Ok(hex::encode(self.keypair(path)?.public_key().serialize()))
    }

    fn is_simple_key(&self) -> bool {
        true
    }

    fn is_network_base_hd_path(&self) -> bool {
        true
    }

    fn serialize(&self) -> SerializedKeyMaterial {
        SerializedKeyMaterial {
            private_key: Some(self.encoded.to_string()),
            is_hex: Some(self.is_hex),
            ..Default::default()
        }
    }
}

/// Hardware device descriptor returned in place of a public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub connect_id: String,
    pub device_id: String,
}

/// Key material that lives on a hardware device.
#[derive(Debug, Clone)]
pub struct RemoteDeviceKey {
    descriptor: DeviceDescriptor,
}

impl RemoteDeviceKey {
    pub fn new(connect_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                connect_id: connect_id.into(),
                device_id: device_id.into(),
            },
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
}

impl KeyCapabilities for RemoteDeviceKey {
    fn keypair(&self, _path: &HdPath) -> Result<Keypair, WalletError> {
        Err(WalletError::Unsupported(
            "remote device keys never leave the device".to_string(),
        ))
    }

    /// The device is the only public key source, so the descriptor is returned instead.
    fn export_public_key(&self, _path: &HdPath) -> Result<String, WalletError> {
        Ok(serde_json::to_string(&self.descriptor)?)
    }

    fn is_simple_key(&self) -> bool {
        false
    }

    fn is_network_base_hd_path(&self) -> bool {
        true
    }

    fn serialize(&self) -> SerializedKeyMaterial {
        SerializedKeyMaterial {
            connect_id: Some(self.descriptor.connect_id.clone()),
            device_id: Some(self.descriptor.device_id.clone()),
            ..Default::default()
        }
    }
}

/// Closed set of key material kinds.
pub enum KeyMaterial {
    Seed(SeedKey),
    Raw(RawKey),
    RemoteDevice(RemoteDeviceKey),
}

impl KeyMaterial {
    /// Rebuild key material from its persisted form, choosing the kind by the fields present.
    pub fn deserialize(state: &SerializedKeyMaterial) -> Result<Self, WalletError> {
        if let Some(seed_hex) = &state.seed {
            let seed = Zeroizing::new(hex::decode(seed_hex.trim_start_matches("0x"))?);
            return Ok(KeyMaterial::Seed(SeedKey::from_seed(&seed, !state.legacy_hd_path)?));
        }
        if let Some(private_key) = &state.private_key {
            let key = if state.is_hex.unwrap_or(false) {
                RawKey::from_hex(private_key)?
            } else {
                RawKey::import(private_key)?
            };
            return Ok(KeyMaterial::Raw(key));
        }
        if let (Some(connect_id), Some(device_id)) = (&state.connect_id, &state.device_id) {
            return Ok(KeyMaterial::RemoteDevice(RemoteDeviceKey::new(
                connect_id.clone(),
                device_id.clone(),
            )));
        }
        Err(WalletError::SerializationError(
            "stored wallet has no seed, private key or device descriptor".to_string(),
        ))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            KeyMaterial::Seed(_) => "seed",
            KeyMaterial::Raw(_) => "raw",
            KeyMaterial::RemoteDevice(_) => "remote_device",
        }
    }

    pub fn is_remote_device(&self) -> bool {
        matches!(self, KeyMaterial::RemoteDevice(_))
    }

    fn inner(&self) -> &dyn KeyCapabilities {
        match self {
            KeyMaterial::Seed(k) => k,
            KeyMaterial::Raw(k) => k,
            KeyMaterial::RemoteDevice(k) => k,
        }
    }
}

impl KeyCapabilities for KeyMaterial {
    fn keypair(&self, path: &HdPath) -> Result<Keypair, WalletError> {
        self.inner().keypair(path)
    }

    fn export_public_key(&self, path: &HdPath) -> Result<String, WalletError> {
        self.inner().export_public_key(path)
    }

    fn is_simple_key(&self) -> bool {
        self.inner().is_simple_key()
    }

    fn is_network_base_hd_path(&self) -> bool {
        self.inner().is_network_base_hd_path()
    }

    fn serialize(&self) -> SerializedKeyMaterial {
        info!("serializing {} key material", self.kind());
        self.inner().serialize()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial::{}(<redacted>)", self.kind())
    }
}

impl FromStr for RawKey {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RawKey::import(s)
    }
}

/// Generate a fresh 12-word BIP39 phrase.
pub fn generate_mnemonic() -> Result<Zeroizing<String>, WalletError> {
    use rand::rngs::OsRng;
    use rand::RngCore;

    let mut entropy = Zeroizing::new([0u8; 16]);
    OsRng.fill_bytes(&mut entropy[..]);
    let mnemonic = bip39::Mnemonic::from_entropy(&entropy[..])
        .map_err(|e| WalletError::MnemonicError(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}
