//! Cell-chain hashing: blake2b-256 with the `ckb-default-hash` personalization.

use ckb_hash::{blake2b_256, new_blake2b};

/// Prefix mixed into personal-message digests.
pub const PERSONAL_MESSAGE_PREFIX: &[u8] = b"Nervos Message:";

/// Length of a secp256k1-blake160 lock argument.
pub const BLAKE160_LEN: usize = 20;

pub fn blake2b(data: &[u8]) -> [u8; 32] {
    blake2b_256(data)
}

/// First 20 bytes of the blake2b-256 digest of `data` (usually a compressed public key).
pub fn blake160(data: &[u8]) -> [u8; BLAKE160_LEN] {
    let digest = blake2b_256(data);
    let mut out = [0u8; BLAKE160_LEN];
    out.copy_from_slice(&digest[..BLAKE160_LEN]);
    out
}

/// Digest signed by `sign_message` on the cell chain.
pub fn personal_message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = new_blake2b();
    hasher.update(PERSONAL_MESSAGE_PREFIX);
    hasher.update(message);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}
