//! BIP32 derivation paths
//!
//! Path format: m/purpose'/coin_type'/account'/change/address_index
//!
//! Hardened segments may be marked with `'`, `h` or `H`. Every segment must be a
//! decimal number below 2^31; the hardened offset is applied after parsing.

use bitcoin::bip32::{ChildNumber, DerivationPath};
use std::fmt;

use crate::core::errors::WalletError;
use crate::core::network::{AddressType, Network};

/// Offset added to an index to mark hardened derivation.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Parsed derivation path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct HdPath {
    indices: Vec<u32>,
}

impl HdPath {
    /// Root path (`m`).
    pub fn root() -> Self {
        Self { indices: Vec::new() }
    }

    pub fn parse(path: &str) -> Result<Self, WalletError> {
        let path = path.trim();
        let mut segments = path.split('/');

        match segments.next() {
            Some("m") | Some("M") => {}
            _ => {
                return Err(WalletError::InvalidPath(format!(
                    "path must start with 'm': {:?}",
                    path
                )))
            }
        }

        let mut indices = Vec::new();
        for segment in segments {
            indices.push(Self::parse_segment(segment, path)?);
        }

        Ok(Self { indices })
    }

    fn parse_segment(segment: &str, path: &str) -> Result<u32, WalletError> {
        let (digits, hardened) = match segment.strip_suffix(['\'', 'h', 'H']) {
            Some(rest) => (rest, true),
            None => (segment, false),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WalletError::InvalidPath(format!(
                "malformed segment {:?} in {:?}",
                segment, path
            )));
        }

        let index: u32 = digits.parse().map_err(|_| {
            WalletError::InvalidPath(format!("index overflow in segment {:?} of {:?}", segment, path))
        })?;
        if index >= HARDENED_OFFSET {
            return Err(WalletError::InvalidPath(format!(
                "index {} out of range in {:?}",
                index, path
            )));
        }

        Ok(if hardened { index | HARDENED_OFFSET } else { index })
    }

    /// Raw indices; values >= 2^31 are hardened.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn is_root(&self) -> bool {
        self.indices.is_empty()
    }

    /// Append a non-hardened child index.
    pub fn child(&self, index: u32) -> Result<Self, WalletError> {
        if index >= HARDENED_OFFSET {
            return Err(WalletError::InvalidPath(format!("child index {} out of range", index)));
        }
        let mut indices = self.indices.clone();
        indices.push(index);
        Ok(Self { indices })
    }

    pub fn to_derivation_path(&self) -> Result<DerivationPath, WalletError> {
        let children = self
            .indices
            .iter()
            .map(|&i| {
                if i >= HARDENED_OFFSET {
                    ChildNumber::from_hardened_idx(i - HARDENED_OFFSET)
                } else {
                    ChildNumber::from_normal_idx(i)
                }
                .map_err(|e| WalletError::InvalidPath(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DerivationPath::from(children))
    }
}

impl fmt::Display for HdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for &i in &self.indices {
            if i >= HARDENED_OFFSET {
                write!(f, "/{}'", i - HARDENED_OFFSET)?;
            } else {
                write!(f, "/{}", i)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for HdPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// BIP44-style account base (everything except the address index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bip44Path {
    pub purpose: u32,
    pub coin_type: u32,
    pub account: u32,
    pub change: u32,
}

impl Bip44Path {
    /// Default base path for an address type on a network.
    ///
    /// With `network_base` the coin type follows the network (`1'` on Bitcoin test
    /// networks); legacy imports always use the mainnet coin type.
    pub fn for_address_type(address_type: AddressType, network: Network, network_base: bool) -> Self {
        let purpose = match address_type {
            AddressType::P2pkh => 44,
            AddressType::P2shP2wpkh => 49,
            AddressType::P2wpkh => 84,
            AddressType::P2tr => 86,
            AddressType::CkbSecp256k1 => 44,
        };
        let coin_type = match (address_type, network.is_testnet() && network_base) {
            (AddressType::CkbSecp256k1, _) => 309,
            (_, true) => 1,
            (_, false) => 0,
        };
        Self {
            purpose,
            coin_type,
            account: 0,
            change: 0,
        }
    }

    pub fn to_hd_path(&self) -> HdPath {
        HdPath {
            indices: vec![
                self.purpose | HARDENED_OFFSET,
                self.coin_type | HARDENED_OFFSET,
                self.account | HARDENED_OFFSET,
                self.change,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn test_parse_bip44_path() {
        let path = HdPath::parse("m/44'/0'/0'/0/5").unwrap();
        assert_eq!(
            path.indices(),
            &[0x8000002C, 0x80000000, 0x80000000, 0, 5]
        );
        assert_eq!(path.to_string(), "m/44'/0'/0'/0/5");
    }

    #[test]
    fn test_alternate_hardened_markers() {
        let a = HdPath::parse("m/84h/0H/0'").unwrap();
        let b = HdPath::parse("m/84'/0'/0'").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_root_path() {
        let path = HdPath::parse("m").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "m");
    }

    #[test_case("" ; "empty")]
    #[test_case("44'/0'" ; "missing root")]
    #[test_case("m/" ; "empty segment")]
    #[test_case("m/44'/abc" ; "non numeric")]
    #[test_case("m/44''" ; "double marker")]
    #[test_case("m/-1" ; "negative")]
    #[test_case("m/2147483648" ; "index at hardened offset")]
    #[test_case("m/99999999999" ; "u32 overflow")]
    fn test_invalid_paths(raw: &str) {
        assert!(matches!(HdPath::parse(raw), Err(WalletError::InvalidPath(_))));
    }

    #[test]
    fn test_child_append() {
        let base = HdPath::parse("m/84'/0'/0'/0").unwrap();
        assert_eq!(base.child(3).unwrap().to_string(), "m/84'/0'/0'/0/3");
        assert!(base.child(HARDENED_OFFSET).is_err());
    }

    #[test]
    fn test_bip44_defaults() {
        let p = Bip44Path::for_address_type(AddressType::P2tr, Network::Bitcoin, true);
        assert_eq!(p.to_hd_path().to_string(), "m/86'/0'/0'/0");

        let p = Bip44Path::for_address_type(AddressType::P2wpkh, Network::BitcoinTestnet, true);
        assert_eq!(p.to_hd_path().to_string(), "m/84'/1'/0'/0");

        // legacy import flavor keeps the mainnet coin type on testnet
        let p = Bip44Path::for_address_type(AddressType::P2wpkh, Network::BitcoinTestnet, false);
        assert_eq!(p.to_hd_path().to_string(), "m/84'/0'/0'/0");

        let p = Bip44Path::for_address_type(AddressType::CkbSecp256k1, Network::CkbTestnet, true);
        assert_eq!(p.to_hd_path().to_string(), "m/44'/309'/0'/0");
    }

    proptest! {
        #[test]
        fn prop_display_parse_roundtrip(raw in proptest::collection::vec(0u32..HARDENED_OFFSET, 0..6),
                                        hardened in proptest::collection::vec(any::<bool>(), 6)) {
            let indices: Vec<u32> = raw
                .iter()
                .zip(hardened.iter())
                .map(|(i, h)| if *h { i | HARDENED_OFFSET } else { *i })
                .collect();
            let path = HdPath { indices };
            let reparsed = HdPath::parse(&path.to_string()).unwrap();
            prop_assert_eq!(reparsed, path);
        }
    }
}
