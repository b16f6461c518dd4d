use serde::{Deserialize, Serialize};
use std::env;

use crate::core::errors::WalletError;

/// UTXO builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinBuilderConfig {
    /// Outputs below this value (sat) are never created
    #[serde(default = "BitcoinBuilderConfig::default_dust_floor")]
    pub dust_floor: u64,

    /// Fee rate (sat/vB) used when the fee-rate provider gives no hint
    #[serde(default = "BitcoinBuilderConfig::default_fee_rate")]
    pub default_fee_rate: f64,
}

impl BitcoinBuilderConfig {
    fn default_dust_floor() -> u64 { 546 }
    fn default_fee_rate() -> f64 { 1.0 }
}

impl Default for BitcoinBuilderConfig {
    fn default() -> Self {
        Self {
            dust_floor: Self::default_dust_floor(),
            default_fee_rate: Self::default_fee_rate(),
        }
    }
}

/// Cell-chain builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CkbBuilderConfig {
    /// Capacity (shannons) reserved for the transaction fee
    #[serde(default = "CkbBuilderConfig::default_fee_reserve")]
    pub fee_reserve: u64,

    /// Fail instead of emitting a change cell below its occupied capacity
    /// when the sender has no more cells to top it up
    #[serde(default)]
    pub strict_change_capacity: bool,
}

impl CkbBuilderConfig {
    fn default_fee_reserve() -> u64 { 100_000 }
}

impl Default for CkbBuilderConfig {
    fn default() -> Self {
        Self {
            fee_reserve: Self::default_fee_reserve(),
            strict_change_capacity: false,
        }
    }
}

/// Account resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// How many indices under the active base path are scanned when an
    /// address or public key has to be mapped back to a path
    #[serde(default = "AccountConfig::default_address_lookahead")]
    pub address_lookahead: u32,

    /// Path whose public key identifies a wallet for duplicate detection
    #[serde(default = "AccountConfig::default_canonical_duplicate_path")]
    pub canonical_duplicate_path: String,
}

impl AccountConfig {
    fn default_address_lookahead() -> u32 { 20 }
    fn default_canonical_duplicate_path() -> String { "m/44'/0'/0'/0".to_string() }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            address_lookahead: Self::default_address_lookahead(),
            canonical_duplicate_path: Self::default_canonical_duplicate_path(),
        }
    }
}

/// keyring配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyringConfig {
    #[serde(default)]
    pub bitcoin: BitcoinBuilderConfig,
    #[serde(default)]
    pub ckb: CkbBuilderConfig,
    #[serde(default)]
    pub accounts: AccountConfig,
}

impl KeyringConfig {
    /// Parse a TOML document; missing sections fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, WalletError> {
        let config: KeyringConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `KEYRING_*` environment variables.
    pub fn from_env() -> Result<Self, WalletError> {
        let mut config = KeyringConfig::default();

        if let Ok(v) = env::var("KEYRING_DUST_FLOOR") {
            config.bitcoin.dust_floor = v
                .parse()
                .map_err(|_| WalletError::ConfigError(format!("KEYRING_DUST_FLOOR: {}", v)))?;
        }
        if let Ok(v) = env::var("KEYRING_DEFAULT_FEE_RATE") {
            config.bitcoin.default_fee_rate = v
                .parse()
                .map_err(|_| WalletError::ConfigError(format!("KEYRING_DEFAULT_FEE_RATE: {}", v)))?;
        }
        if let Ok(v) = env::var("KEYRING_CKB_FEE_RESERVE") {
            config.ckb.fee_reserve = v
                .parse()
                .map_err(|_| WalletError::ConfigError(format!("KEYRING_CKB_FEE_RESERVE: {}", v)))?;
        }
        if let Ok(v) = env::var("KEYRING_CKB_STRICT_CHANGE_CAPACITY") {
            config.ckb.strict_change_capacity = v
                .parse()
                .map_err(|_| WalletError::ConfigError(format!("KEYRING_CKB_STRICT_CHANGE_CAPACITY: {}", v)))?;
        }
        if let Ok(v) = env::var("KEYRING_ADDRESS_LOOKAHEAD") {
            config.accounts.address_lookahead = v
                .parse()
                .map_err(|_| WalletError::ConfigError(format!("KEYRING_ADDRESS_LOOKAHEAD: {}", v)))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        let rate = self.bitcoin.default_fee_rate;
        if rate.is_nan() || rate <= 0.0 {
            return Err(WalletError::ConfigError(
                "default_fee_rate must be positive".to_string(),
            ));
        }
        if self.accounts.address_lookahead == 0 {
            return Err(WalletError::ConfigError(
                "address_lookahead must be at least 1".to_string(),
            ));
        }
        crate::core::hd_path::HdPath::parse(&self.accounts.canonical_duplicate_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KeyringConfig::default();
        assert_eq!(config.bitcoin.dust_floor, 546);
        assert_eq!(config.ckb.fee_reserve, 100_000);
        assert!(!config.ckb.strict_change_capacity);
        assert_eq!(config.accounts.address_lookahead, 20);
        assert_eq!(config.accounts.canonical_duplicate_path, "m/44'/0'/0'/0");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = KeyringConfig::from_toml_str(
            r#"
            [bitcoin]
            dust_floor = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.bitcoin.dust_floor, 1000);
        assert_eq!(config.bitcoin.default_fee_rate, 1.0);
        assert_eq!(config.ckb.fee_reserve, 100_000);
    }

    #[test]
    fn test_rejects_bad_duplicate_path() {
        let err = KeyringConfig::from_toml_str(
            r#"
            [accounts]
            canonical_duplicate_path = "m/44'/zero"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::InvalidPath(_)));
    }

    #[test]
    fn test_rejects_zero_lookahead() {
        let err = KeyringConfig::from_toml_str("[accounts]\naddress_lookahead = 0\n").unwrap_err();
        assert!(matches!(err, WalletError::ConfigError(_)));
    }
}
