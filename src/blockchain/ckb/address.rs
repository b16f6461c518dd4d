//! Cell-chain lock scripts and full-format addresses
//!
//! Full format payload: `0x00 || code_hash (32) || hash_type (1) || args`, bech32m
//! encoded under `ckb` (mainnet) or `ckt` (testnet).

use bech32::primitives::checksum::Checksum;
use bech32::primitives::decode::CheckedHrpstring;
use bech32::Hrp;
use bitcoin::secp256k1::PublicKey;
use ckb_types::bytes::Bytes;
use ckb_types::core::{DepType, ScriptHashType};
use ckb_types::packed::{Byte32, CellDep, OutPoint, Script};
use ckb_types::prelude::*;
use ckb_types::H256;
use tracing::debug;

use super::hash::blake160;
use crate::core::errors::WalletError;
use crate::core::network::Network;

/// Code hash of the secp256k1-blake160 sighash-all lock (`hash_type = type`).
pub const SECP256K1_BLAKE160_SIGHASH_ALL_TYPE_HASH: H256 = H256([
    0x9b, 0xd7, 0xe0, 0x6f, 0x3e, 0xcf, 0x4b, 0xe0, 0xf2, 0xfc, 0xd2, 0x18, 0x8b, 0x23, 0xf1, 0xb9,
    0xfc, 0xc8, 0x8e, 0x5d, 0x4b, 0x65, 0xa8, 0x63, 0x7b, 0x17, 0x72, 0x3b, 0xbd, 0xa3, 0xcc, 0xe8,
]);

// genesis transactions holding the secp256k1 dep group at index 0
const MAINNET_SECP_DEP_GROUP_TX: H256 = H256([
    0x71, 0xa7, 0xba, 0x8f, 0xc9, 0x63, 0x49, 0xfe, 0xa0, 0xed, 0x3a, 0x5c, 0x47, 0x99, 0x2e, 0x3b,
    0x40, 0x84, 0xb0, 0x31, 0xa4, 0x22, 0x64, 0xa0, 0x18, 0xe0, 0x07, 0x2e, 0x81, 0x72, 0xe4, 0x6c,
]);
const TESTNET_SECP_DEP_GROUP_TX: H256 = H256([
    0xf8, 0xde, 0x3b, 0xb4, 0x7d, 0x05, 0x5c, 0xdf, 0x46, 0x0d, 0x93, 0xa2, 0xa6, 0xe1, 0xb0, 0x5f,
    0x74, 0x32, 0xf9, 0x77, 0x7c, 0x8c, 0x47, 0x4a, 0xbf, 0x4e, 0xec, 0x1d, 0x4a, 0xee, 0x5d, 0x37,
]);

const FULL_FORMAT: u8 = 0x00;

/// Bech32m with the code length raised; full-format addresses exceed the 90 char limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CkbBech32m {}

impl Checksum for CkbBech32m {
    type MidstateRepr = u32;
    const CODE_LENGTH: usize = 1023;
    const CHECKSUM_LENGTH: usize = 6;
    const GENERATOR_SH: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
    const TARGET_RESIDUE: u32 = 0x2bc830a3;
}

fn hrp_for(network: Network) -> Result<&'static str, WalletError> {
    match network {
        Network::Ckb => Ok("ckb"),
        Network::CkbTestnet => Ok("ckt"),
        other => Err(WalletError::InvalidNetwork(format!(
            "{} is not a cell-chain network",
            other
        ))),
    }
}

/// secp256k1-blake160 lock for a public key.
pub fn lock_from_public_key(public_key: &PublicKey) -> Script {
    let args = blake160(&public_key.serialize());
    Script::new_builder()
        .code_hash(SECP256K1_BLAKE160_SIGHASH_ALL_TYPE_HASH.pack())
        .hash_type(ScriptHashType::Type.into())
        .args(Bytes::copy_from_slice(&args).pack())
        .build()
}

/// Dep-group cell dep that brings the secp256k1 lock code into a transaction.
pub fn secp256k1_cell_dep(network: Network) -> Result<CellDep, WalletError> {
    let tx_hash = match network {
        Network::Ckb => MAINNET_SECP_DEP_GROUP_TX,
        Network::CkbTestnet => TESTNET_SECP_DEP_GROUP_TX,
        other => {
            return Err(WalletError::InvalidNetwork(format!(
                "no secp256k1 dep group on {}",
                other
            )))
        }
    };
    Ok(CellDep::new_builder()
        .out_point(OutPoint::new(tx_hash.pack(), 0))
        .dep_type(DepType::DepGroup.into())
        .build())
}

/// Encode a lock script as a full-format address.
pub fn encode_address(lock: &Script, network: Network) -> Result<String, WalletError> {
    let hrp = Hrp::parse(hrp_for(network)?)
        .map_err(|e| WalletError::InvalidAddress(format!("hrp: {}", e)))?;

    let code_hash = lock.code_hash();
    let args = lock.args().raw_data();
    let mut payload = Vec::with_capacity(1 + 32 + 1 + args.len());
    payload.push(FULL_FORMAT);
    payload.extend_from_slice(code_hash.as_slice());
    payload.push(lock.hash_type().into());
    payload.extend_from_slice(&args);

    let address = bech32::encode::<CkbBech32m>(hrp, &payload)
        .map_err(|e| WalletError::InvalidAddress(format!("bech32m encoding failed: {}", e)))?;
    debug!("✅ cell-chain address encoded");
    Ok(address)
}

/// Parse a full-format address back into its lock script.
pub fn parse_address(address: &str, network: Network) -> Result<Script, WalletError> {
    let expected = hrp_for(network)?;
    let checked = CheckedHrpstring::new::<CkbBech32m>(address)
        .map_err(|e| WalletError::InvalidAddress(format!("{}: {}", address, e)))?;
    if checked.hrp().as_str() != expected {
        return Err(WalletError::InvalidNetwork(format!(
            "address prefix {} does not belong to {}",
            checked.hrp(),
            network
        )));
    }

    let payload: Vec<u8> = checked.byte_iter().collect();
    if payload.len() < 34 || payload[0] != FULL_FORMAT {
        return Err(WalletError::InvalidAddress(format!(
            "{} is not a full-format address",
            address
        )));
    }

    let code_hash = Byte32::from_slice(&payload[1..33])
        .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
    let hash_type = ScriptHashType::try_from(payload[33])
        .map_err(|_| WalletError::InvalidAddress(format!("unknown hash type {}", payload[33])))?;

    Ok(Script::new_builder()
        .code_hash(code_hash)
        .hash_type(hash_type.into())
        .args(Bytes::copy_from_slice(&payload[34..]).pack())
        .build())
}
