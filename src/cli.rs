use clap::{Parser, Subcommand};

use crate::core::errors::WalletError;
use crate::core::network::{AddressType, Network};

/// Process exit codes
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_RETRYABLE: i32 = 2;
pub const EXIT_UNSUPPORTED: i32 = 3;

/// Keyring CLI (library-facing definitions)
#[derive(Debug, Parser)]
#[command(name = "keyring-cli", about = "Multi-chain keyring CLI", disable_help_subcommand = true)]
pub struct Cli {
    /// Network: bitcoin, testnet, signet, regtest, ckb, ckb_testnet
    #[arg(long, global = true, default_value = "bitcoin")]
    pub network: Network,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Address of the mnemonic in KEYRING_MNEMONIC
    DeriveAddress {
        /// p2pkh, p2wpkh, p2tr, p2sh-p2wpkh or ckb
        #[arg(long, default_value = "p2wpkh")]
        address_type: AddressType,
        #[arg(long, default_value_t = 0)]
        index: u32,
    },
    SignMessage {
        #[arg(long, default_value = "p2wpkh")]
        address_type: AddressType,
        #[arg(long, default_value_t = 0)]
        index: u32,
        #[arg(long)]
        message: String,
        /// BIP-322 simple signature instead of a recoverable one
        #[arg(long)]
        bip322: bool,
    },
    VerifyMessage {
        #[arg(long)]
        address: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        signature: String,
    },
    GenerateMnemonic,
}

/// Exit code for a failed command, plus a hint for the user when one applies.
pub fn classify_error(err: &anyhow::Error) -> (i32, Option<&'static str>) {
    match err.downcast_ref::<WalletError>() {
        Some(e) if e.is_capability_error() => {
            (EXIT_UNSUPPORTED, Some("this wallet kind cannot perform the request"))
        }
        Some(e) if e.is_retryable() => (EXIT_RETRYABLE, Some("retry with adjusted parameters")),
        _ => (EXIT_FAILURE, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sign_message() {
        let cli = Cli::try_parse_from([
            "keyring-cli",
            "--network",
            "testnet",
            "sign-message",
            "--address-type",
            "p2tr",
            "--message",
            "hello",
            "--bip322",
        ])
        .unwrap();
        assert_eq!(cli.network, Network::BitcoinTestnet);
        match cli.command {
            Commands::SignMessage {
                address_type,
                index,
                bip322,
                ..
            } => {
                assert_eq!(address_type, AddressType::P2tr);
                assert_eq!(index, 0);
                assert!(bip322);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_classify_error_exit_codes() {
        let unsupported = anyhow::Error::new(WalletError::Unsupported("device".into()));
        assert_eq!(classify_error(&unsupported).0, EXIT_UNSUPPORTED);

        let retryable = anyhow::Error::new(WalletError::InsufficientBalance("short".into()));
        assert_eq!(classify_error(&retryable).0, EXIT_RETRYABLE);
        assert!(classify_error(&retryable).1.is_some());

        let other = anyhow::Error::new(WalletError::InvalidPath("m/x".into()));
        assert_eq!(classify_error(&other), (EXIT_FAILURE, None));
        assert_eq!(classify_error(&anyhow::anyhow!("plain")), (EXIT_FAILURE, None));
    }

    #[test]
    fn test_rejects_unknown_network() {
        assert!(Cli::try_parse_from(["keyring-cli", "--network", "dogecoin", "generate-mnemonic"]).is_err());
    }
}
