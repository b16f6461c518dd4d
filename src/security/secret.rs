//! Secret byte buffers that are zeroized on drop.
use zeroize::Zeroizing;

/// Seed bytes, session passwords and other secrets held by the keyring.
pub type SecretVec = Zeroizing<Vec<u8>>;

pub fn vec_to_secret(v: Vec<u8>) -> SecretVec {
    Zeroizing::new(v)
}

/// Copy a password into a zeroizing buffer.
pub fn password_to_secret(password: &str) -> SecretVec {
    Zeroizing::new(password.as_bytes().to_vec())
}
