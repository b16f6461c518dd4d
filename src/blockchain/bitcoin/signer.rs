//! PSBT signing engine
//!
//! Inputs are signed strictly in ascending index order. Taproot inputs get a
//! Schnorr signature from the tweaked key; everything else gets ECDSA under the
//! BIP-143 (segwit v0) or legacy digest. Every key is resolved before the first
//! input is touched, so a bad path never leaves a half-signed PSBT behind.

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::key::TapTweak;
use bitcoin::psbt::{Input, Psbt};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, XOnlyPublicKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot;
use bitcoin::{PublicKey, Transaction, TxOut, Witness};
use serde::Serialize;
use tracing::{debug, info};

use super::address::{detect_script_type, p2sh_p2wpkh_redeem_script, script_pubkey};
use crate::core::errors::WalletError;
use crate::core::hd_path::HdPath;
use crate::core::network::AddressType;

/// One input to sign and the key path that controls it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInput {
    pub index: usize,
    pub path: HdPath,
    /// Consensus sighash flags; `None` means ALL (DEFAULT for taproot).
    pub sighash_type: Option<u32>,
}

impl SignInput {
    pub fn new(index: usize, path: HdPath) -> Self {
        Self {
            index,
            path,
            sighash_type: None,
        }
    }
}

/// Signature produced for one input, for external aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialSignature {
    pub index: usize,
    /// Compressed public key hex (x-only for taproot).
    pub public_key: String,
    /// Signature hex with the sighash byte appended when it is not DEFAULT.
    pub signature: String,
    pub taproot: bool,
}

/// Previous output spent by input `index`, from `witness_utxo` or `non_witness_utxo`.
fn spent_output(psbt: &Psbt, index: usize) -> Option<TxOut> {
    let input = psbt.inputs.get(index)?;
    if let Some(utxo) = &input.witness_utxo {
        return Some(utxo.clone());
    }
    let prev = input.non_witness_utxo.as_ref()?;
    let vout = psbt.unsigned_tx.input.get(index)?.previous_output.vout as usize;
    prev.output.get(vout).cloned()
}

/// True when the input carries any taproot field or spends a v1 P2TR output.
pub fn is_taproot_input(input: &Input) -> bool {
    input.tap_internal_key.is_some()
        || input.tap_merkle_root.is_some()
        || !input.tap_scripts.is_empty()
        || input
            .witness_utxo
            .as_ref()
            .map(|utxo| utxo.script_pubkey.is_p2tr())
            .unwrap_or(false)
}

/// Sign the listed inputs in index order with keys from `key_for`.
pub fn sign_inputs<F>(psbt: &mut Psbt, inputs: &[SignInput], key_for: F) -> Result<Vec<PartialSignature>, WalletError>
where
    F: Fn(&HdPath) -> Result<Keypair, WalletError>,
{
    info!("signing {} PSBT inputs", inputs.len());

    let mut ordered: Vec<&SignInput> = inputs.iter().collect();
    ordered.sort_by_key(|i| i.index);

    // resolve everything up front: no partial success
    let mut resolved = Vec::with_capacity(ordered.len());
    for input in ordered {
        if input.index >= psbt.inputs.len() || input.index >= psbt.unsigned_tx.input.len() {
            return Err(WalletError::InvalidInput(format!(
                "input index {} out of range ({} inputs)",
                input.index,
                psbt.inputs.len()
            )));
        }
        let keypair = key_for(&input.path)?;
        resolved.push((input, keypair));
    }

    let prevouts: Vec<Option<TxOut>> = (0..psbt.inputs.len()).map(|i| spent_output(psbt, i)).collect();
    let unsigned_tx = psbt.unsigned_tx.clone();
    let mut cache = SighashCache::new(&unsigned_tx);
    let secp = Secp256k1::new();

    let mut signatures = Vec::with_capacity(resolved.len());
    for (request, keypair) in resolved {
        let index = request.index;
        let spent = prevouts[index].clone().ok_or_else(|| {
            WalletError::TransactionFailed(format!("input {} has no spent output", index))
        })?;

        let signature = if is_taproot_input(&psbt.inputs[index]) {
            sign_taproot_input(&secp, &mut cache, psbt, &prevouts, request, &keypair, &spent)?
        } else {
            sign_ecdsa_input(&secp, &mut cache, psbt, request, &keypair, &spent)?
        };
        debug!("✅ input {} signed", index);
        signatures.push(signature);
    }

    Ok(signatures)
}

fn sign_taproot_input(
    secp: &Secp256k1<bitcoin::secp256k1::All>,
    cache: &mut SighashCache<&Transaction>,
    psbt: &mut Psbt,
    prevouts: &[Option<TxOut>],
    request: &SignInput,
    keypair: &Keypair,
    spent: &TxOut,
) -> Result<PartialSignature, WalletError> {
    let index = request.index;
    let hash_ty = match request.sighash_type {
        Some(flags) => u8::try_from(flags)
            .ok()
            .and_then(|f| TapSighashType::from_consensus_u8(f).ok())
            .ok_or_else(|| WalletError::InvalidInput(format!("bad taproot sighash {:#x}", flags)))?,
        None => TapSighashType::Default,
    };

    let (internal_key, _) = keypair.x_only_public_key();
    let merkle_root = psbt.inputs[index].tap_merkle_root;
    let tweaked = keypair.tap_tweak(secp, merkle_root).to_inner();

    let (output_key, _) = tweaked.x_only_public_key();
    let script = &spent.script_pubkey;
    if !script.is_p2tr() || XOnlyPublicKey::from_slice(&script.as_bytes()[2..34]).ok() != Some(output_key) {
        return Err(WalletError::SigningFailed(format!(
            "input {} is not spendable by the taproot key",
            index
        )));
    }

    let all: Vec<TxOut> = prevouts
        .iter()
        .cloned()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| WalletError::TransactionFailed("taproot signing needs every spent output".to_string()))?;
    let sighash = cache
        .taproot_key_spend_signature_hash(index, &Prevouts::All(&all), hash_ty)
        .map_err(|e| WalletError::SigningFailed(format!("taproot sighash: {}", e)))?;

    let message = Message::from_digest(*sighash.as_byte_array());
    let sig = secp.sign_schnorr_no_aux_rand(&message, &tweaked);
    let signature = taproot::Signature { sig, hash_ty };

    let input = &mut psbt.inputs[index];
    input.tap_internal_key = Some(internal_key);
    input.tap_key_sig = Some(signature);

    Ok(PartialSignature {
        index,
        public_key: hex::encode(internal_key.serialize()),
        signature: hex::encode(signature.to_vec()),
        taproot: true,
    })
}

fn sign_ecdsa_input(
    secp: &Secp256k1<bitcoin::secp256k1::All>,
    cache: &mut SighashCache<&Transaction>,
    psbt: &mut Psbt,
    request: &SignInput,
    keypair: &Keypair,
    spent: &TxOut,
) -> Result<PartialSignature, WalletError> {
    let index = request.index;
    let hash_ty = match request.sighash_type {
        Some(flags) => EcdsaSighashType::from_standard(flags)
            .map_err(|e| WalletError::InvalidInput(format!("bad sighash {:#x}: {}", flags, e)))?,
        None => EcdsaSighashType::All,
    };

    let secp_pk = keypair.public_key();
    let script = &spent.script_pubkey;
    let script_type = detect_script_type(script).ok_or_else(|| {
        WalletError::Unsupported(format!("input {} spends an unsupported script", index))
    })?;
    if *script != script_pubkey(script_type, &secp_pk)? {
        return Err(WalletError::SigningFailed(format!(
            "input {} is not spendable by the key at {}",
            index, request.path
        )));
    }

    let digest = match script_type {
        AddressType::P2wpkh | AddressType::P2shP2wpkh => {
            let program = if script_type == AddressType::P2shP2wpkh {
                let redeem = p2sh_p2wpkh_redeem_script(&secp_pk)?;
                psbt.inputs[index].redeem_script.get_or_insert(redeem).clone()
            } else {
                script.clone()
            };
            let script_code = program.p2wpkh_script_code().ok_or_else(|| {
                WalletError::SigningFailed(format!("input {} has no P2WPKH program", index))
            })?;
            #[allow(deprecated)]
            let sighash = cache
                .segwit_signature_hash(index, &script_code, spent.value, hash_ty)
                .map_err(|e| WalletError::SigningFailed(format!("segwit sighash: {}", e)))?;
            *sighash.as_byte_array()
        }
        AddressType::P2pkh => {
            let sighash = cache
                .legacy_signature_hash(index, script, hash_ty.to_u32())
                .map_err(|e| WalletError::SigningFailed(format!("legacy sighash: {}", e)))?;
            *sighash.as_byte_array()
        }
        other => {
            return Err(WalletError::Unsupported(format!(
                "{:?} inputs are not signed with ECDSA",
                other
            )))
        }
    };

    let sig = secp.sign_ecdsa(&Message::from_digest(digest), &keypair.secret_key());
    let signature = ecdsa::Signature { sig, hash_ty };
    let public_key = PublicKey::new(secp_pk);
    psbt.inputs[index].partial_sigs.insert(public_key, signature);

    Ok(PartialSignature {
        index,
        public_key: hex::encode(public_key.to_bytes()),
        signature: hex::encode(signature.to_vec()),
        taproot: false,
    })
}

/// Sign every input with one key path.
pub fn sign_all_inputs_with_path<F>(
    psbt: &mut Psbt,
    path: &HdPath,
    sighash_type: Option<u32>,
    key_for: F,
) -> Result<Vec<PartialSignature>, WalletError>
where
    F: Fn(&HdPath) -> Result<Keypair, WalletError>,
{
    let inputs: Vec<SignInput> = (0..psbt.inputs.len())
        .map(|index| SignInput {
            index,
            path: path.clone(),
            sighash_type,
        })
        .collect();
    sign_inputs(psbt, &inputs, key_for)
}

fn push_bytes(data: Vec<u8>) -> Result<PushBytesBuf, WalletError> {
    PushBytesBuf::try_from(data)
        .map_err(|e| WalletError::TransactionFailed(format!("push too large: {:?}", e)))
}

/// Turn the signatures of every input into final script sigs / witnesses.
pub fn finalize_psbt(psbt: &mut Psbt) -> Result<(), WalletError> {
    for index in 0..psbt.inputs.len() {
        let spent = spent_output(psbt, index);
        let input = &mut psbt.inputs[index];
        if input.final_script_witness.is_some() || input.final_script_sig.is_some() {
            continue;
        }

        if let Some(sig) = input.tap_key_sig {
            input.final_script_witness = Some(Witness::from_slice(&[sig.to_vec()]));
        } else {
            let (public_key, sig) = input
                .partial_sigs
                .iter()
                .next()
                .map(|(pk, sig)| (*pk, *sig))
                .ok_or_else(|| WalletError::TransactionFailed(format!("input {} is not signed", index)))?;
            let script = spent
                .map(|s| s.script_pubkey)
                .ok_or_else(|| WalletError::TransactionFailed(format!("input {} has no spent output", index)))?;

            match detect_script_type(&script) {
                Some(AddressType::P2wpkh) => {
                    input.final_script_witness =
                        Some(Witness::from_slice(&[sig.to_vec(), public_key.to_bytes()]));
                }
                Some(AddressType::P2shP2wpkh) => {
                    let redeem = input.redeem_script.clone().ok_or_else(|| {
                        WalletError::TransactionFailed(format!("input {} has no redeem script", index))
                    })?;
                    input.final_script_sig = Some(
                        Builder::new()
                            .push_slice(push_bytes(redeem.to_bytes())?)
                            .into_script(),
                    );
                    input.final_script_witness =
                        Some(Witness::from_slice(&[sig.to_vec(), public_key.to_bytes()]));
                }
                Some(AddressType::P2pkh) => {
                    input.final_script_sig = Some(
                        Builder::new()
                            .push_slice(push_bytes(sig.to_vec())?)
                            .push_key(&public_key)
                            .into_script(),
                    );
                }
                _ => {
                    return Err(WalletError::Unsupported(format!(
                        "cannot finalize input {}",
                        index
                    )))
                }
            }
        }

        input.partial_sigs.clear();
        input.sighash_type = None;
        input.redeem_script = None;
        input.witness_script = None;
        input.bip32_derivation.clear();
        input.tap_key_sig = None;
        input.tap_internal_key = None;
        input.tap_merkle_root = None;
        input.tap_key_origins.clear();
        input.tap_scripts.clear();
    }
    debug!("✅ PSBT finalized");
    Ok(())
}

/// Broadcastable transaction from a finalized PSBT.
pub fn extract_transaction(psbt: &Psbt) -> Result<Transaction, WalletError> {
    let mut tx = psbt.unsigned_tx.clone();
    let mut input_total = 0u64;
    for (index, (txin, input)) in tx.input.iter_mut().zip(psbt.inputs.iter()).enumerate() {
        if input.final_script_sig.is_none() && input.final_script_witness.is_none() {
            return Err(WalletError::TransactionFailed(format!("input {} is not finalized", index)));
        }
        txin.script_sig = input.final_script_sig.clone().unwrap_or_default();
        txin.witness = input.final_script_witness.clone().unwrap_or_default();

        let value = spent_output(psbt, index)
            .map(|o| o.value.to_sat())
            .ok_or_else(|| WalletError::TransactionFailed(format!("input {} has no spent output", index)))?;
        input_total = input_total
            .checked_add(value)
            .ok_or_else(|| WalletError::TransactionFailed("input sum overflows".to_string()))?;
    }

    let output_total = tx
        .output
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value.to_sat()))
        .ok_or_else(|| WalletError::TransactionFailed("output sum overflows".to_string()))?;
    if output_total > input_total {
        return Err(WalletError::TransactionFailed(format!(
            "outputs {} exceed inputs {}",
            output_total, input_total
        )));
    }
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, Txid};
    use std::str::FromStr;

    fn keypair(byte: u8) -> Keypair {
        Keypair::from_secret_key(&Secp256k1::new(), &SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    fn psbt_spending(scripts: &[ScriptBuf]) -> Psbt {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: scripts
                .iter()
                .enumerate()
                .map(|(i, _)| TxIn {
                    previous_output: OutPoint {
                        txid: Txid::from_str(&format!("{:064x}", i + 1)).unwrap(),
                        vout: 0,
                    },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![TxOut {
                value: Amount::from_sat(9_000),
                script_pubkey: scripts[0].clone(),
            }],
        };
        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
        for (input, script) in psbt.inputs.iter_mut().zip(scripts) {
            input.witness_utxo = Some(TxOut {
                value: Amount::from_sat(10_000),
                script_pubkey: script.clone(),
            });
        }
        psbt
    }

    fn key_fn(kp: Keypair) -> impl Fn(&HdPath) -> Result<Keypair, WalletError> {
        move |_| Ok(kp)
    }

    #[test]
    fn test_sign_and_finalize_every_script_type() {
        let kp = keypair(7);
        let pk = kp.public_key();
        for t in [AddressType::P2wpkh, AddressType::P2shP2wpkh, AddressType::P2pkh, AddressType::P2tr] {
            let mut psbt = psbt_spending(&[script_pubkey(t, &pk).unwrap()]);
            let sigs = sign_inputs(&mut psbt, &[SignInput::new(0, HdPath::root())], key_fn(kp)).unwrap();
            assert_eq!(sigs.len(), 1);
            assert_eq!(sigs[0].taproot, t == AddressType::P2tr);

            finalize_psbt(&mut psbt).unwrap();
            let tx = extract_transaction(&psbt).unwrap();
            match t {
                AddressType::P2pkh => assert!(!tx.input[0].script_sig.is_empty()),
                AddressType::P2tr => assert_eq!(tx.input[0].witness.len(), 1),
                AddressType::P2shP2wpkh => {
                    assert_eq!(tx.input[0].witness.len(), 2);
                    assert!(!tx.input[0].script_sig.is_empty());
                }
                _ => assert_eq!(tx.input[0].witness.len(), 2),
            }
        }
    }

    #[test]
    fn test_taproot_signature_verifies() {
        let kp = keypair(8);
        let script = script_pubkey(AddressType::P2tr, &kp.public_key()).unwrap();
        let mut psbt = psbt_spending(&[script.clone()]);
        sign_inputs(&mut psbt, &[SignInput::new(0, HdPath::root())], key_fn(kp)).unwrap();

        let sig = psbt.inputs[0].tap_key_sig.unwrap();
        assert_eq!(sig.hash_ty, TapSighashType::Default);
        assert_eq!(psbt.inputs[0].tap_internal_key, Some(kp.x_only_public_key().0));

        let prevouts = vec![psbt.inputs[0].witness_utxo.clone().unwrap()];
        let sighash = SighashCache::new(&psbt.unsigned_tx)
            .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), TapSighashType::Default)
            .unwrap();
        let output_key = XOnlyPublicKey::from_slice(&script.as_bytes()[2..34]).unwrap();
        let secp = Secp256k1::new();
        assert!(secp
            .verify_schnorr(&sig.sig, &Message::from_digest(*sighash.as_byte_array()), &output_key)
            .is_ok());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let script = script_pubkey(AddressType::P2wpkh, &keypair(1).public_key()).unwrap();
        let mut psbt = psbt_spending(&[script]);
        let err = sign_inputs(&mut psbt, &[SignInput::new(0, HdPath::root())], key_fn(keypair(2))).unwrap_err();
        assert!(matches!(err, WalletError::SigningFailed(_)));
    }

    #[test]
    fn test_unresolvable_path_leaves_psbt_untouched() {
        let kp = keypair(3);
        let script = script_pubkey(AddressType::P2wpkh, &kp.public_key()).unwrap();
        let mut psbt = psbt_spending(&[script.clone(), script]);
        let bad = HdPath::parse("m/1").unwrap();
        let inputs = [SignInput::new(0, HdPath::root()), SignInput::new(1, bad.clone())];
        let err = sign_inputs(&mut psbt, &inputs, |p: &HdPath| {
            if *p == bad {
                Err(WalletError::AccountNotFound(p.to_string()))
            } else {
                Ok(kp)
            }
        })
        .unwrap_err();
        assert!(matches!(err, WalletError::AccountNotFound(_)));
        assert!(psbt.inputs.iter().all(|i| i.partial_sigs.is_empty()));
    }

    #[test]
    fn test_sign_without_finalizing_keeps_psbt_open() {
        let kp = keypair(4);
        let script = script_pubkey(AddressType::P2wpkh, &kp.public_key()).unwrap();
        let mut psbt = psbt_spending(&[script.clone(), script]);
        let sigs = sign_all_inputs_with_path(&mut psbt, &HdPath::root(), None, key_fn(kp)).unwrap();
        assert_eq!(sigs.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1]);
        assert!(psbt.inputs.iter().all(|i| i.partial_sigs.len() == 1));
        assert!(psbt.inputs.iter().all(|i| i.final_script_witness.is_none()));
        assert!(extract_transaction(&psbt).is_err());
    }

    #[test]
    fn test_custom_sighash_flag() {
        let kp = keypair(5);
        let script = script_pubkey(AddressType::P2wpkh, &kp.public_key()).unwrap();
        let mut psbt = psbt_spending(&[script]);
        let input = SignInput {
            index: 0,
            path: HdPath::root(),
            sighash_type: Some(0x83),
        };
        let sigs = sign_inputs(&mut psbt, &[input], key_fn(kp)).unwrap();
        assert!(sigs[0].signature.ends_with("83"));
    }

    #[test]
    fn test_finalize_requires_signatures() {
        let kp = keypair(6);
        let script = script_pubkey(AddressType::P2wpkh, &kp.public_key()).unwrap();
        let mut psbt = psbt_spending(&[script]);
        assert!(matches!(finalize_psbt(&mut psbt), Err(WalletError::TransactionFailed(_))));
    }
}
