//! BIP-322 generic message signing ("simple" format)
//!
//! A signature proves control of an address by spending a virtual `to_spend`
//! output that commits to the message. The result is the base64 consensus
//! encoding of the `to_sign` input's witness.
//!
//! Legacy P2PKH addresses have no witness; they fall back to the recoverable
//! ECDSA message signature.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::opcodes::OP_0;
use bitcoin::psbt::Psbt;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Message, Secp256k1, XOnlyPublicKey};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{ecdsa, taproot};
use bitcoin::{Amount, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::address::{detect_type, parse_address, script_pubkey};
use super::signer::SignInput;
use crate::core::errors::WalletError;
use crate::core::hd_path::HdPath;
use crate::core::key_material::KeyCapabilities;
use crate::core::network::{AddressType, Network};
use crate::crypto::signature_utils;

/// Domain tag of the message hash.
pub const BIP322_TAG: &[u8] = b"BIP0322-signed-message";

const SIGHASH_ALL: u32 = 0x01;

/// `sha256(sha256(tag) || sha256(tag) || message)`
pub fn message_hash(message: &[u8]) -> [u8; 32] {
    let tag_hash = Sha256::digest(BIP322_TAG);
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    hasher.update(message);
    hasher.finalize().into()
}

/// Virtual transaction whose single output pays to the signing address.
pub fn to_spend(script_pubkey: &ScriptBuf, message: &[u8]) -> Transaction {
    let script_sig = Builder::new()
        .push_opcode(OP_0)
        .push_slice(message_hash(message))
        .into_script();
    Transaction {
        version: Version(0),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::all_zeros(),
                vout: 0xFFFF_FFFF,
            },
            script_sig,
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: script_pubkey.clone(),
        }],
    }
}

/// Unsigned `to_sign` PSBT spending the `to_spend` output into an OP_RETURN.
pub fn to_sign(to_spend: &Transaction) -> Result<Psbt, WalletError> {
    let tx = Transaction {
        version: Version(0),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: to_spend.txid(),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: Builder::new().push_opcode(OP_RETURN).into_script(),
        }],
    };
    let mut psbt = Psbt::from_unsigned_tx(tx)
        .map_err(|e| WalletError::TransactionFailed(format!("to_sign: {}", e)))?;
    psbt.inputs[0].witness_utxo = to_spend.output.first().cloned();
    Ok(psbt)
}

/// Sign `message` for `address` with the key at `path`.
pub fn sign_simple<K>(key: &K, path: &HdPath, address: &str, network: Network, message: &str) -> Result<String, WalletError>
where
    K: KeyCapabilities + ?Sized,
{
    info!("BIP-322 signing for {}", address);
    let address_type = detect_type(address, network)?;
    if address_type == AddressType::P2pkh {
        debug!("legacy address, using recoverable message signature");
        return key.sign_message(path, message, network);
    }

    let script = parse_address(address, network)?.script_pubkey();
    let virtual_spend = to_spend(&script, message.as_bytes());
    let mut psbt = to_sign(&virtual_spend)?;

    let sighash_type = (address_type == AddressType::P2tr).then_some(SIGHASH_ALL);
    let input = SignInput {
        index: 0,
        path: path.clone(),
        sighash_type,
    };
    key.sign_psbt(&mut psbt, &[input])?;

    let witness = psbt.inputs[0]
        .final_script_witness
        .take()
        .filter(|w| !w.is_empty())
        .ok_or_else(|| WalletError::EmptyWitness(format!("no witness for {}", address)))?;
    Ok(BASE64.encode(serialize(&witness)))
}

/// Check a simple signature against an address and message.
///
/// Returns `Ok(false)` for a well-formed signature that does not verify.
pub fn verify_simple(address: &str, network: Network, message: &str, signature: &str) -> Result<bool, WalletError> {
    let raw = BASE64
        .decode(signature.trim())
        .map_err(|e| WalletError::InvalidInput(format!("signature is not base64: {}", e)))?;
    let address_type = detect_type(address, network)?;
    let script = parse_address(address, network)?.script_pubkey();

    if address_type == AddressType::P2pkh {
        let digest = signature_utils::sha256_message_digest(message.as_bytes());
        let recovered = match signature_utils::recover_public_key(&digest, &raw) {
            Ok(pk) => pk,
            Err(_) => return Ok(false),
        };
        return Ok(script_pubkey(AddressType::P2pkh, &recovered)? == script);
    }

    let witness: Witness = deserialize(&raw)
        .map_err(|e| WalletError::InvalidInput(format!("signature is not a witness: {}", e)))?;
    let virtual_spend = to_spend(&script, message.as_bytes());
    let psbt = to_sign(&virtual_spend)?;
    let mut cache = SighashCache::new(&psbt.unsigned_tx);
    let secp = Secp256k1::verification_only();

    match address_type {
        AddressType::P2wpkh | AddressType::P2shP2wpkh => {
            if witness.len() != 2 {
                return Ok(false);
            }
            let (Some(sig_bytes), Some(pk_bytes)) = (witness.nth(0), witness.nth(1)) else {
                return Ok(false);
            };
            let sig = ecdsa::Signature::from_slice(sig_bytes)
                .map_err(|e| WalletError::InvalidInput(format!("bad ECDSA signature: {}", e)))?;
            let public_key = PublicKey::from_slice(pk_bytes)
                .map_err(|e| WalletError::InvalidInput(format!("bad public key: {}", e)))?;
            if script_pubkey(address_type, &public_key.inner)? != script {
                return Ok(false);
            }
            let script_code = script_pubkey(AddressType::P2wpkh, &public_key.inner)?
                .p2wpkh_script_code()
                .ok_or_else(|| WalletError::InvalidInput("no P2WPKH program".to_string()))?;
            #[allow(deprecated)]
            let sighash = cache
                .segwit_signature_hash(0, &script_code, Amount::ZERO, sig.hash_ty)
                .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
            let message = Message::from_digest(*sighash.as_byte_array());
            Ok(secp.verify_ecdsa(&message, &sig.sig, &public_key.inner).is_ok())
        }
        AddressType::P2tr => {
            let Some(sig_bytes) = witness.nth(0).filter(|_| witness.len() == 1) else {
                return Ok(false);
            };
            let sig = taproot::Signature::from_slice(sig_bytes)
                .map_err(|e| WalletError::InvalidInput(format!("bad Schnorr signature: {}", e)))?;
            let output_key = XOnlyPublicKey::from_slice(&script.as_bytes()[2..34])
                .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
            let prevouts = [virtual_spend.output[0].clone()];
            let sighash = cache
                .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), sig.hash_ty)
                .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
            let message = Message::from_digest(*sighash.as_byte_array());
            Ok(secp.verify_schnorr(&sig.sig, &message, &output_key).is_ok())
        }
        other => Err(WalletError::InvalidAddressType(format!("{:?}", other))),
    }
}
