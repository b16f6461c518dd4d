use anyhow::Context;
use ckb_types::prelude::Entity;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wallet_keyring::blockchain::bitcoin::bip322;
use wallet_keyring::cli::{classify_error, Cli, Commands};
use wallet_keyring::core::config::KeyringConfig;
use wallet_keyring::core::keyring::{ActiveAccount, Keyring, StaticSelection, WalletSource};
use wallet_keyring::core::network::{AddressType, Network};
use wallet_keyring::crypto::signature_utils;
use wallet_keyring::storage::MemoryWalletStore;
use zeroize::Zeroizing;

// the CLI never persists anything, so the in-memory vault password is fixed
const SESSION_PASSWORD: &str = "keyring-cli";

async fn unlocked_keyring(network: Network, address_type: AddressType, index: u32) -> anyhow::Result<Keyring> {
    let phrase = Zeroizing::new(
        std::env::var("KEYRING_MNEMONIC").context("KEYRING_MNEMONIC must hold a BIP39 phrase")?,
    );
    let passphrase = Zeroizing::new(std::env::var("KEYRING_PASSPHRASE").unwrap_or_default());

    let selection = Arc::new(StaticSelection::new(ActiveAccount {
        wallet_id: 0,
        network,
        address_type,
        account_index: index,
    }));
    let keyring = Keyring::new(
        Arc::new(MemoryWalletStore::new()),
        selection,
        KeyringConfig::from_env()?,
    )?;
    keyring.init(SESSION_PASSWORD).await?;
    keyring
        .new_keyring(WalletSource::Mnemonic {
            phrase,
            passphrase,
            legacy_hd_path: false,
        })
        .await?;
    Ok(keyring)
}

fn verify(network: Network, address: &str, message: &str, signature: &str) -> anyhow::Result<bool> {
    if network.is_ckb() {
        let lock = wallet_keyring::blockchain::ckb::parse_address(address, network)?;
        let digest = wallet_keyring::blockchain::ckb::hash::personal_message_digest(message.as_bytes());
        let raw = hex::decode(signature.trim_start_matches("0x"))?;
        let public_key = signature_utils::recover_public_key(&digest, &raw)?;
        let recovered = wallet_keyring::blockchain::ckb::lock_from_public_key(&public_key);
        return Ok(recovered.as_slice() == lock.as_slice());
    }
    Ok(bip322::verify_simple(address, network, message, signature)?)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()).await {
        let (code, hint) = classify_error(&err);
        eprintln!("Error: {:#}", err);
        if let Some(hint) = hint {
            eprintln!("hint: {}", hint);
        }
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::DeriveAddress { address_type, index } => {
            let keyring = unlocked_keyring(cli.network, address_type, index).await?;
            println!("{}", keyring.get_address().await?);
        }
        Commands::SignMessage {
            address_type,
            index,
            message,
            bip322,
        } => {
            let keyring = unlocked_keyring(cli.network, address_type, index).await?;
            let signature = if bip322 {
                keyring.sign_bip322_simple(&message).await?
            } else {
                keyring.sign_message(&message)?
            };
            tracing::info!(network = %cli.network, "message signed");
            println!("{}", signature);
        }
        Commands::VerifyMessage {
            address,
            message,
            signature,
        } => {
            let valid = verify(cli.network, &address, &message, &signature)?;
            println!("{}", if valid { "valid" } else { "invalid" });
            if !valid {
                std::process::exit(1);
            }
        }
        Commands::GenerateMnemonic => {
            // printing a fresh secret requires an explicit opt-in
            if std::env::var("KEYRING_ALLOW_PLAINTEXT_MNEMONIC").ok().as_deref() != Some("1") {
                anyhow::bail!("set KEYRING_ALLOW_PLAINTEXT_MNEMONIC=1 to print a new mnemonic");
            }
            let phrase = wallet_keyring::core::key_material::generate_mnemonic()?;
            println!("{}", &*phrase);
        }
    }
    Ok(())
}
