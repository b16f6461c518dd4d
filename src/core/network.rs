//! Networks and address/script types understood by the keyring.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::errors::WalletError;

/// Network selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Bitcoin,
    BitcoinTestnet,
    BitcoinSignet,
    BitcoinRegtest,
    Ckb,
    CkbTestnet,
}

impl Network {
    /// UTXO-chain networks map onto a `bitcoin::Network`; the cell chain does not.
    pub fn to_bitcoin(self) -> Option<bitcoin::Network> {
        match self {
            Network::Bitcoin => Some(bitcoin::Network::Bitcoin),
            Network::BitcoinTestnet => Some(bitcoin::Network::Testnet),
            Network::BitcoinSignet => Some(bitcoin::Network::Signet),
            Network::BitcoinRegtest => Some(bitcoin::Network::Regtest),
            Network::Ckb | Network::CkbTestnet => None,
        }
    }

    /// Same as [`Network::to_bitcoin`] but fails `InvalidNetwork` for the cell chain.
    pub fn require_bitcoin(self) -> Result<bitcoin::Network, WalletError> {
        self.to_bitcoin().ok_or_else(|| {
            WalletError::InvalidNetwork(format!("{} is not a UTXO-chain network", self))
        })
    }

    pub fn is_ckb(self) -> bool {
        matches!(self, Network::Ckb | Network::CkbTestnet)
    }

    pub fn is_testnet(self) -> bool {
        !matches!(self, Network::Bitcoin | Network::Ckb)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::BitcoinTestnet => "bitcoin_testnet",
            Network::BitcoinSignet => "bitcoin_signet",
            Network::BitcoinRegtest => "bitcoin_regtest",
            Network::Ckb => "ckb",
            Network::CkbTestnet => "ckb_testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bitcoin" | "mainnet" | "livenet" => Ok(Network::Bitcoin),
            "bitcoin_testnet" | "testnet" => Ok(Network::BitcoinTestnet),
            "bitcoin_signet" | "signet" => Ok(Network::BitcoinSignet),
            "bitcoin_regtest" | "regtest" => Ok(Network::BitcoinRegtest),
            "ckb" | "ckb_mainnet" => Ok(Network::Ckb),
            "ckb_testnet" | "ckt" => Ok(Network::CkbTestnet),
            other => Err(WalletError::InvalidNetwork(other.to_string())),
        }
    }
}

/// Script type of an account address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AddressType {
    /// Pay to public key hash (1xxx)
    P2pkh,
    /// Native segwit v0 (bc1q)
    P2wpkh,
    /// Taproot key path (bc1p)
    P2tr,
    /// Segwit wrapped in P2SH (3xxx)
    P2shP2wpkh,
    /// Cell-chain secp256k1-blake160 sighash-all lock
    CkbSecp256k1,
}

impl AddressType {
    pub fn is_ckb(self) -> bool {
        matches!(self, AddressType::CkbSecp256k1)
    }

    /// Fails `InvalidNetwork` when the type and the network belong to different chains.
    pub fn check_network(self, network: Network) -> Result<(), WalletError> {
        if self.is_ckb() != network.is_ckb() {
            return Err(WalletError::InvalidNetwork(format!(
                "{:?} addresses do not exist on {}",
                self, network
            )));
        }
        Ok(())
    }
}

impl TryFrom<u8> for AddressType {
    type Error = WalletError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AddressType::P2pkh),
            1 => Ok(AddressType::P2wpkh),
            2 => Ok(AddressType::P2tr),
            3 => Ok(AddressType::P2shP2wpkh),
            4 => Ok(AddressType::CkbSecp256k1),
            other => Err(WalletError::InvalidAddressType(format!("unknown address type {}", other))),
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::P2pkh => 0,
            AddressType::P2wpkh => 1,
            AddressType::P2tr => 2,
            AddressType::P2shP2wpkh => 3,
            AddressType::CkbSecp256k1 => 4,
        }
    }
}

impl FromStr for AddressType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "p2pkh" | "legacy" => Ok(AddressType::P2pkh),
            "p2wpkh" | "segwit" => Ok(AddressType::P2wpkh),
            "p2tr" | "taproot" => Ok(AddressType::P2tr),
            "p2sh-p2wpkh" | "p2sh_p2wpkh" | "nested-segwit" => Ok(AddressType::P2shP2wpkh),
            "ckb" | "ckb-secp256k1" => Ok(AddressType::CkbSecp256k1),
            other => Err(WalletError::InvalidAddressType(other.to_string())),
        }
    }
}
