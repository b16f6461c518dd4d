use std::fmt;

/// Error type for keyring, derivation, signing and builder operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Malformed derivation path (bad segment, non-numeric, index overflow).
    InvalidPath(String),
    /// Unknown or unusable address/script type.
    InvalidAddressType(String),
    /// Unknown network, or a network that does not fit the requested operation.
    InvalidNetwork(String),
    /// A to-sign selector (path, address or public key) matched no account.
    AccountNotFound(String),
    /// Operation is not defined for this kind of key material.
    Unsupported(String),
    /// A wallet with the same canonical public key is already registered.
    AlreadyExisted(String),
    /// Inputs can never cover outputs plus fee.
    InsufficientBalance(String),
    /// Witness packing found a lock field that is already populated.
    LockFieldAlreadySet(String),
    /// Message signing finished without producing a witness.
    EmptyWitness(String),
    /// Surfaced unchanged from the storage collaborator.
    IncorrectPassword(String),
    /// Invalid private key material (bad hex, bad WIF, out of range).
    InvalidPrivateKey(String),
    /// Mnemonic parsing errors.
    MnemonicError(String),
    /// Address could not be parsed or does not match the network.
    InvalidAddress(String),
    /// Signature creation failed.
    SigningFailed(String),
    /// Transaction assembly or finalization failed.
    TransactionFailed(String),
    /// Serialization/deserialization errors.
    SerializationError(String),
    /// Storage collaborator errors other than a bad password.
    StorageError(String),
    /// Hardware device delegate errors.
    DeviceError(String),
    /// Configuration-related errors.
    ConfigError(String),
    /// Invalid caller input.
    InvalidInput(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletError::InvalidPath(msg) => write!(f, "Invalid path: {}", msg),
            WalletError::InvalidAddressType(msg) => write!(f, "Invalid address type: {}", msg),
            WalletError::InvalidNetwork(msg) => write!(f, "Invalid network: {}", msg),
            WalletError::AccountNotFound(msg) => write!(f, "Account not found: {}", msg),
            WalletError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            WalletError::AlreadyExisted(msg) => write!(f, "Already existed: {}", msg),
            WalletError::InsufficientBalance(msg) => write!(f, "Insufficient balance: {}", msg),
            WalletError::LockFieldAlreadySet(msg) => write!(f, "Lock field already set: {}", msg),
            WalletError::EmptyWitness(msg) => write!(f, "Empty witness: {}", msg),
            WalletError::IncorrectPassword(msg) => write!(f, "Incorrect password: {}", msg),
            WalletError::InvalidPrivateKey(msg) => write!(f, "Invalid private key: {}", msg),
            WalletError::MnemonicError(msg) => write!(f, "Mnemonic error: {}", msg),
            WalletError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            WalletError::SigningFailed(msg) => write!(f, "Signing failed: {}", msg),
            WalletError::TransactionFailed(msg) => write!(f, "Transaction failed: {}", msg),
            WalletError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::DeviceError(msg) => write!(f, "Device error: {}", msg),
            WalletError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            WalletError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

impl WalletError {
    /// Errors a caller can fix by retrying with adjusted parameters
    /// (higher fee, smaller amount, different selector).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::InsufficientBalance(_)
                | WalletError::DeviceError(_)
                | WalletError::StorageError(_)
        )
    }

    /// Errors that indicate the request can never succeed for this wallet kind.
    pub fn is_capability_error(&self) -> bool {
        matches!(self, WalletError::Unsupported(_))
    }
}

impl From<anyhow::Error> for WalletError {
    fn from(err: anyhow::Error) -> Self {
        WalletError::InvalidInput(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for WalletError {
    fn from(err: toml::de::Error) -> Self {
        WalletError::ConfigError(err.to_string())
    }
}

impl From<hex::FromHexError> for WalletError {
    fn from(err: hex::FromHexError) -> Self {
        WalletError::InvalidInput(format!("invalid hex: {}", err))
    }
}
