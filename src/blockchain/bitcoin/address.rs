//! UTXO-chain address engine
//!
//! Supported script types:
//! - P2PKH (1xxx / mxxx)
//! - P2SH-P2WPKH (3xxx / 2xxx)
//! - P2WPKH (bc1q / tb1q)
//! - P2TR key path only (bc1p / tb1p)

use bitcoin::address::{Address, NetworkUnchecked, Payload};
use bitcoin::key::PublicKey as BitcoinPublicKey;
use bitcoin::secp256k1::{PublicKey, Secp256k1, XOnlyPublicKey};
use bitcoin::ScriptBuf;
use std::str::FromStr;
use tracing::debug;

use crate::blockchain::ckb::address as ckb_address;
use crate::core::errors::WalletError;
use crate::core::network::{AddressType, Network};

/// Address plus the script it pays to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDescriptor {
    pub address: String,
    pub script: Vec<u8>,
}

/// Address of `public_key` for a script type on a network.
pub fn address(address_type: AddressType, public_key: &PublicKey, network: Network) -> Result<String, WalletError> {
    Ok(descriptor(address_type, public_key, network)?.address)
}

/// Address and script of `public_key` for a script type on a network.
pub fn descriptor(
    address_type: AddressType,
    public_key: &PublicKey,
    network: Network,
) -> Result<AddressDescriptor, WalletError> {
    address_type.check_network(network)?;

    if address_type.is_ckb() {
        let lock = ckb_address::lock_from_public_key(public_key);
        let address = ckb_address::encode_address(&lock, network)?;
        return Ok(AddressDescriptor {
            address,
            script: ckb_types::prelude::Entity::as_slice(&lock).to_vec(),
        });
    }

    let btc_network = network.require_bitcoin()?;
    let addr = bitcoin_address(address_type, public_key, btc_network)?;
    debug!("✅ {:?} address generated", address_type);
    Ok(AddressDescriptor {
        address: addr.to_string(),
        script: addr.script_pubkey().to_bytes(),
    })
}

pub(crate) fn bitcoin_address(
    address_type: AddressType,
    public_key: &PublicKey,
    network: bitcoin::Network,
) -> Result<Address, WalletError> {
    let btc_pubkey = BitcoinPublicKey::new(*public_key);
    match address_type {
        AddressType::P2pkh => Ok(Address::p2pkh(&btc_pubkey, network)),
        AddressType::P2wpkh => Address::p2wpkh(&btc_pubkey, network)
            .map_err(|e| WalletError::InvalidAddress(format!("P2WPKH: {}", e))),
        AddressType::P2shP2wpkh => Address::p2shwpkh(&btc_pubkey, network)
            .map_err(|e| WalletError::InvalidAddress(format!("P2SH-P2WPKH: {}", e))),
        AddressType::P2tr => {
            let secp = Secp256k1::verification_only();
            let internal_key = XOnlyPublicKey::from(*public_key);
            Ok(Address::p2tr(&secp, internal_key, None, network))
        }
        AddressType::CkbSecp256k1 => Err(WalletError::InvalidAddressType(
            "cell-chain lock is not a UTXO address".to_string(),
        )),
    }
}

/// Script paid to by `public_key` under `address_type`; network independent.
pub fn script_pubkey(address_type: AddressType, public_key: &PublicKey) -> Result<ScriptBuf, WalletError> {
    Ok(bitcoin_address(address_type, public_key, bitcoin::Network::Bitcoin)?.script_pubkey())
}

/// P2WPKH program wrapped by a P2SH-P2WPKH output.
pub fn p2sh_p2wpkh_redeem_script(public_key: &PublicKey) -> Result<ScriptBuf, WalletError> {
    script_pubkey(AddressType::P2wpkh, public_key)
}

/// Parse an address string, checking it belongs to `network`.
pub fn parse_address(address: &str, network: Network) -> Result<Address, WalletError> {
    let btc_network = network.require_bitcoin()?;
    let unchecked = Address::<NetworkUnchecked>::from_str(address)
        .map_err(|e| WalletError::InvalidAddress(format!("{}: {}", address, e)))?;
    unchecked
        .require_network(btc_network)
        .map_err(|e| WalletError::InvalidNetwork(format!("{}: {}", address, e)))
}

/// Script bytes of an address. Inverse of [`descriptor`].
pub fn script_from_address(address: &str, network: Network) -> Result<Vec<u8>, WalletError> {
    if network.is_ckb() {
        let lock = ckb_address::parse_address(address, network)?;
        return Ok(ckb_types::prelude::Entity::as_slice(&lock).to_vec());
    }
    Ok(parse_address(address, network)?.script_pubkey().to_bytes())
}

/// Script type of a UTXO-chain address.
pub fn detect_type(address: &str, network: Network) -> Result<AddressType, WalletError> {
    let addr = parse_address(address, network)?;
    match addr.payload() {
        Payload::PubkeyHash(_) => Ok(AddressType::P2pkh),
        Payload::ScriptHash(_) => Ok(AddressType::P2shP2wpkh),
        Payload::WitnessProgram(program) => match program.version().to_num() {
            0 if program.program().len() == 20 => Ok(AddressType::P2wpkh),
            1 if program.program().len() == 32 => Ok(AddressType::P2tr),
            v => Err(WalletError::InvalidAddressType(format!(
                "unsupported witness program v{}",
                v
            ))),
        },
        _ => Err(WalletError::InvalidAddressType(address.to_string())),
    }
}

/// Script type of a script pubkey, when it is one the signing engine understands.
pub fn detect_script_type(script: &ScriptBuf) -> Option<AddressType> {
    if script.is_p2tr() {
        Some(AddressType::P2tr)
    } else if script.is_p2wpkh() {
        Some(AddressType::P2wpkh)
    } else if script.is_p2sh() {
        Some(AddressType::P2shP2wpkh)
    } else if script.is_p2pkh() {
        Some(AddressType::P2pkh)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;
    use test_case::test_case;

    fn bip84_first_key() -> PublicKey {
        let raw = hex::decode("0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c").unwrap();
        PublicKey::from_slice(&raw).unwrap()
    }

    fn sample_key() -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[0x42; 32]).unwrap())
    }

    #[test]
    fn test_bip84_vector_address() {
        let addr = address(AddressType::P2wpkh, &bip84_first_key(), Network::Bitcoin).unwrap();
        assert_eq!(addr, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
    }

    #[test_case(AddressType::P2pkh, Network::Bitcoin, "1" ; "p2pkh mainnet")]
    #[test_case(AddressType::P2pkh, Network::BitcoinTestnet, "m" ; "p2pkh testnet")]
    #[test_case(AddressType::P2shP2wpkh, Network::Bitcoin, "3" ; "nested mainnet")]
    #[test_case(AddressType::P2wpkh, Network::BitcoinTestnet, "tb1q" ; "segwit testnet")]
    #[test_case(AddressType::P2tr, Network::Bitcoin, "bc1p" ; "taproot mainnet")]
    #[test_case(AddressType::P2tr, Network::BitcoinRegtest, "bcrt1p" ; "taproot regtest")]
    #[test_case(AddressType::CkbSecp256k1, Network::Ckb, "ckb1" ; "cell mainnet")]
    fn test_address_prefix(address_type: AddressType, network: Network, prefix: &str) {
        let addr = address(address_type, &sample_key(), network).unwrap();
        assert!(addr.starts_with(prefix), "{} should start with {}", addr, prefix);
    }

    #[test_case(AddressType::P2pkh, Network::Bitcoin ; "p2pkh")]
    #[test_case(AddressType::P2shP2wpkh, Network::BitcoinTestnet ; "nested")]
    #[test_case(AddressType::P2wpkh, Network::BitcoinSignet ; "segwit")]
    #[test_case(AddressType::P2tr, Network::Bitcoin ; "taproot")]
    #[test_case(AddressType::CkbSecp256k1, Network::CkbTestnet ; "cell")]
    fn test_script_roundtrip(address_type: AddressType, network: Network) {
        let d = descriptor(address_type, &sample_key(), network).unwrap();
        assert_eq!(script_from_address(&d.address, network).unwrap(), d.script);
        if !address_type.is_ckb() {
            assert_eq!(detect_type(&d.address, network).unwrap(), address_type);
        }
    }

    #[test]
    fn test_chain_mismatch_is_invalid_network() {
        assert!(matches!(
            address(AddressType::P2wpkh, &sample_key(), Network::Ckb),
            Err(WalletError::InvalidNetwork(_))
        ));
        let mainnet = address(AddressType::P2wpkh, &sample_key(), Network::Bitcoin).unwrap();
        assert!(matches!(
            script_from_address(&mainnet, Network::BitcoinTestnet),
            Err(WalletError::InvalidNetwork(_))
        ));
    }

    #[test]
    fn test_detect_script_type() {
        let pk = sample_key();
        for t in [AddressType::P2pkh, AddressType::P2wpkh, AddressType::P2tr, AddressType::P2shP2wpkh] {
            assert_eq!(detect_script_type(&script_pubkey(t, &pk).unwrap()), Some(t));
        }
        assert_eq!(detect_script_type(&ScriptBuf::new()), None);
    }
}
