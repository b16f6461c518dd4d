//! Secret handling: zeroizing buffers and log redaction.

pub mod redaction;
pub mod secret;

pub use redaction::redact_body;
pub use secret::SecretVec;
