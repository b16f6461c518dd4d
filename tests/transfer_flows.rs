mod common;

use bitcoin::secp256k1::PublicKey;
use bitcoin::{Amount, ScriptBuf};
use ckb_types::bytes::Bytes;
use ckb_types::packed::OutPoint;
use ckb_types::prelude::*;
use pretty_assertions::assert_eq;
use std::str::FromStr;
use std::sync::Arc;
use wallet_keyring::blockchain::bitcoin::address;
use wallet_keyring::blockchain::bitcoin::transaction::{CoinTransfer, FeePayer};
use wallet_keyring::blockchain::bitcoin::utxo::{Inscription, Utxo};
use wallet_keyring::blockchain::ckb::skeleton::witness_lock;
use wallet_keyring::blockchain::ckb::{self, LiveCell};
use wallet_keyring::core::keyring::WalletSource;
use wallet_keyring::core::network::{AddressType, Network};
use wallet_keyring::WalletError;

use common::{account, fixture_with, StaticCells, StaticFeeRate, StaticUtxos, ABANDON, ZOO};

fn utxos_for(script: &ScriptBuf, address_type: AddressType, values: &[u64]) -> Vec<Utxo> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| Utxo {
            txid: format!("{:064x}", 0xabc0 + i),
            vout: 1,
            value: *value,
            script_pubkey: hex::encode(script.as_bytes()),
            address: String::new(),
            address_type,
            inscriptions: Vec::new(),
        })
        .collect()
}

fn abandon_key(path: &str) -> PublicKey {
    use wallet_keyring::core::hd_path::HdPath;
    use wallet_keyring::core::key_material::{KeyCapabilities, SeedKey};
    let key = SeedKey::from_mnemonic(ABANDON, "", true).unwrap();
    key.keypair(&HdPath::parse(path).unwrap()).unwrap().public_key()
}

fn recipient(network: Network) -> String {
    address::address(AddressType::P2wpkh, &abandon_key("m/84'/0'/0'/1/0"), network).unwrap()
}

#[test_log::test(tokio::test)]
async fn test_send_coin_sender_pays() {
    let owner = abandon_key("m/84'/0'/0'/0/0");
    let script = address::script_pubkey(AddressType::P2wpkh, &owner).unwrap();
    let mut utxos = utxos_for(&script, AddressType::P2wpkh, &[50_000, 30_000, 90_000]);
    utxos[2].inscriptions.push(Inscription {
        inscription_id: "deadbeefi0".to_string(),
        offset: 0,
    });
    let provider = Arc::new(StaticUtxos::new(utxos));

    let f = fixture_with(
        account(Network::Bitcoin, AddressType::P2wpkh),
        WalletSource::mnemonic(ABANDON),
        |k| k.with_utxo_provider(provider.clone()).with_fee_rate_provider(Arc::new(StaticFeeRate(5.0))),
    )
    .await;

    let sent = f
        .keyring
        .send_coin(&CoinTransfer {
            to_address: recipient(Network::Bitcoin),
            amount: 60_000,
            fee_payer: FeePayer::Sender,
        })
        .await
        .unwrap();

    let tx = &sent.transaction;
    assert_eq!(tx.input.len(), 2);
    assert_eq!(tx.output[0].value, Amount::from_sat(60_000));
    let change = sent.change.expect("change above dust");
    assert_eq!(tx.output[1].value, Amount::from_sat(change));
    assert_eq!(tx.output[1].script_pubkey, script);
    assert_eq!(60_000 + change + sent.fee, 80_000);
    assert!(tx.input.iter().all(|i| i.witness.len() == 2));
}

#[tokio::test]
async fn test_send_coin_receiver_pays_with_default_fee_rate() {
    let owner = abandon_key("m/86'/0'/0'/0/0");
    let script = address::script_pubkey(AddressType::P2tr, &owner).unwrap();
    let provider = Arc::new(StaticUtxos::new(utxos_for(&script, AddressType::P2tr, &[20_000])));
    let f = fixture_with(
        account(Network::Bitcoin, AddressType::P2tr),
        WalletSource::mnemonic(ABANDON),
        |k| k.with_utxo_provider(provider.clone()),
    )
    .await;

    let sent = f
        .keyring
        .send_coin(&CoinTransfer {
            to_address: recipient(Network::Bitcoin),
            amount: 20_000,
            fee_payer: FeePayer::Receiver,
        })
        .await
        .unwrap();

    assert_eq!(sent.change, None);
    assert_eq!(sent.transaction.output.len(), 1);
    assert_eq!(sent.transaction.output[0].value.to_sat() + sent.fee, 20_000);
    // schnorr key-path witness
    assert_eq!(sent.transaction.input[0].witness.len(), 1);
    assert_eq!(sent.transaction.input[0].witness.nth(0).unwrap().len(), 64);
}

#[tokio::test]
async fn test_send_coin_insufficient_balance() {
    let owner = abandon_key("m/84'/0'/0'/0/0");
    let script = address::script_pubkey(AddressType::P2wpkh, &owner).unwrap();
    let provider = Arc::new(StaticUtxos::new(utxos_for(&script, AddressType::P2wpkh, &[10_000])));
    let f = fixture_with(
        account(Network::Bitcoin, AddressType::P2wpkh),
        WalletSource::mnemonic(ABANDON),
        |k| k.with_utxo_provider(provider.clone()),
    )
    .await;

    let result = f
        .keyring
        .send_coin(&CoinTransfer {
            to_address: recipient(Network::Bitcoin),
            amount: 10_000,
            fee_payer: FeePayer::Sender,
        })
        .await;
    assert!(matches!(result, Err(WalletError::InsufficientBalance(_))));
}

#[tokio::test]
async fn test_selection_change_mid_flow_does_not_redirect_signing() {
    let owner = abandon_key("m/84'/0'/0'/0/0");
    let script = address::script_pubkey(AddressType::P2wpkh, &owner).unwrap();
    let provider = Arc::new(StaticUtxos::new(utxos_for(&script, AddressType::P2wpkh, &[70_000])));

    let f = fixture_with(
        account(Network::Bitcoin, AddressType::P2wpkh),
        WalletSource::mnemonic(ABANDON),
        |k| k.with_utxo_provider(provider.clone()),
    )
    .await;
    f.keyring.new_keyring(WalletSource::mnemonic(ZOO)).await.unwrap();

    let selection = f.selection.clone();
    *provider.on_fetch.lock() = Some(Box::new(move || {
        let mut other = account(Network::Bitcoin, AddressType::P2wpkh);
        other.wallet_id = 1;
        selection.set(other);
    }));

    let sent = f
        .keyring
        .send_coin(&CoinTransfer {
            to_address: recipient(Network::Bitcoin),
            amount: 30_000,
            fee_payer: FeePayer::Sender,
        })
        .await
        .unwrap();

    let signer_key = sent.transaction.input[0].witness.nth(1).unwrap();
    assert_eq!(signer_key, &owner.serialize()[..]);
    // the switch itself did happen
    assert_ne!(
        f.keyring.get_address().await.unwrap(),
        "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
    );
}

#[tokio::test]
async fn test_send_coin_needs_provider() {
    let f = fixture_with(
        account(Network::Bitcoin, AddressType::P2wpkh),
        WalletSource::mnemonic(ABANDON),
        |k| k,
    )
    .await;
    let result = f
        .keyring
        .send_coin(&CoinTransfer {
            to_address: recipient(Network::Bitcoin),
            amount: 1_000,
            fee_payer: FeePayer::Sender,
        })
        .await;
    assert!(matches!(result, Err(WalletError::Unsupported(_))));
}

fn sender_cell(lock: &ckb_types::packed::Script, capacity: u64) -> LiveCell {
    LiveCell {
        out_point: OutPoint::new([0x5a; 32].pack(), 0),
        capacity,
        lock: lock.clone(),
        type_script: None,
        data: Bytes::new(),
    }
}

#[test_log::test(tokio::test)]
async fn test_send_ckb_single_cell_scenario() {
    let owner = abandon_key("m/44'/309'/0'/0/0");
    let sender_lock = ckb::lock_from_public_key(&owner);
    let to_key = PublicKey::from_str("0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c").unwrap();
    let to_lock = ckb::lock_from_public_key(&to_key);
    let to_address = ckb::encode_address(&to_lock, Network::CkbTestnet).unwrap();

    let cells = Arc::new(StaticCells(vec![sender_cell(&sender_lock, 12_000_000_000)]));
    let f = fixture_with(
        account(Network::CkbTestnet, AddressType::CkbSecp256k1),
        WalletSource::mnemonic(ABANDON),
        |k| k.with_cell_provider(cells.clone()),
    )
    .await;

    let tx = f.keyring.send_ckb(&to_address, 10_000_000_000).await.unwrap();

    let outputs = tx.outputs();
    assert_eq!(outputs.len(), 2);
    let transfer: u64 = outputs.get(0).unwrap().capacity().unpack();
    let change: u64 = outputs.get(1).unwrap().capacity().unpack();
    assert_eq!(transfer, 10_000_000_000);
    assert_eq!(change, 1_999_900_000);
    assert_eq!(outputs.get(0).unwrap().lock().as_slice(), to_lock.as_slice());
    assert_eq!(outputs.get(1).unwrap().lock().as_slice(), sender_lock.as_slice());

    assert_eq!(tx.witnesses().len(), 1);
    let lock = witness_lock(&tx.witnesses().get(0).unwrap()).unwrap().expect("signed lock");
    assert_eq!(lock.len(), 65);

    // deterministic signing: sealing the same request again is byte-identical
    let again = f.keyring.send_ckb(&to_address, 10_000_000_000).await.unwrap();
    assert_eq!(tx.data().as_slice(), again.data().as_slice());
}

#[tokio::test]
async fn test_send_ckb_rejects_wrong_network_address() {
    let owner = abandon_key("m/44'/309'/0'/0/0");
    let lock = ckb::lock_from_public_key(&owner);
    let mainnet_address = ckb::encode_address(&lock, Network::Ckb).unwrap();
    let cells = Arc::new(StaticCells(vec![sender_cell(&lock, 12_000_000_000)]));
    let f = fixture_with(
        account(Network::CkbTestnet, AddressType::CkbSecp256k1),
        WalletSource::mnemonic(ABANDON),
        |k| k.with_cell_provider(cells.clone()),
    )
    .await;

    assert!(matches!(
        f.keyring.send_ckb(&mainnet_address, 10_000_000_000).await,
        Err(WalletError::InvalidNetwork(_))
    ));
}
