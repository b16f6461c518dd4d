use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::core::errors::WalletError;

/// Length of a packed recoverable signature: r (32) || s (32) || recovery id (1).
pub const RECOVERABLE_SIGNATURE_LEN: usize = 65;

/// Sign a 32-byte digest and pack the result as `r || s || recid`.
///
/// RFC6979 nonces make the output deterministic for a given key and digest.
pub fn sign_recoverable(
    secret_key: &SecretKey,
    digest: &[u8; 32],
) -> [u8; RECOVERABLE_SIGNATURE_LEN] {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(*digest);
    let signature = secp.sign_ecdsa_recoverable(&message, secret_key);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut out = [0u8; RECOVERABLE_SIGNATURE_LEN];
    out[..64].copy_from_slice(&compact);
    out[64] = recovery_id.to_i32() as u8;
    out
}

/// Recover the signer's public key from a digest and a packed recoverable signature.
pub fn recover_public_key(digest: &[u8; 32], signature: &[u8]) -> Result<PublicKey, WalletError> {
    if signature.len() != RECOVERABLE_SIGNATURE_LEN {
        return Err(WalletError::InvalidInput(format!(
            "recoverable signature must be {} bytes, got {}",
            RECOVERABLE_SIGNATURE_LEN,
            signature.len()
        )));
    }

    let recovery_id = RecoveryId::from_i32(i32::from(signature[64]))
        .map_err(|e| WalletError::InvalidInput(format!("bad recovery id: {}", e)))?;
    let signature = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|e| WalletError::InvalidInput(format!("bad signature: {}", e)))?;

    let secp = Secp256k1::verification_only();
    secp.recover_ecdsa(&Message::from_digest(*digest), &signature)
        .map_err(|e| WalletError::InvalidInput(format!("recovery failed: {}", e)))
}

/// Digest used for plain UTXO-chain message signing.
pub fn sha256_message_digest(message: &[u8]) -> [u8; 32] {
    Sha256::digest(message).into()
}

/// Decode a `0x`-optional hex digest into exactly 32 bytes.
pub fn parse_digest_hex(digest_hex: &str) -> Result<[u8; 32], WalletError> {
    let raw = hex::decode(digest_hex.trim_start_matches("0x"))?;
    raw.as_slice().try_into().map_err(|_| {
        WalletError::InvalidInput(format!("digest must be 32 bytes, got {}", raw.len()))
    })
}
