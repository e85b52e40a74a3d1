//! Offline chain verification.
//!
//! Trusts nothing but the export itself and, optionally, a chain head and a
//! seal key recorded out of band.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Args;
use colored::*;
use holdgate_ledger::{import_jsonl, ChainHead, ChainStatus, ChainVerifier, Digest, KeyedDigestSealer};
use holdgate_service::HoldgateConfig;
use tracing::error;

#[derive(Args)]
pub struct VerifyArgs {
    /// JSON-lines ledger export
    pub file: PathBuf,

    /// Expected entry count, recorded out of band
    #[arg(long, requires = "head_digest")]
    pub head_length: Option<u64>,

    /// Expected hex digest of the last entry
    #[arg(long, requires = "head_length")]
    pub head_digest: Option<String>,

    /// Hex key for ledgers sealed with a keyed digest
    #[arg(long, env = "HOLDGATE_SEAL_KEY", hide_env_values = true)]
    pub seal_key: Option<String>,

    /// Sealing authority expected on keyed seals. Defaults to
    /// `ledger.sealing_authority`.
    #[arg(long)]
    pub authority: Option<String>,
}

pub fn execute(config: &HoldgateConfig, args: VerifyArgs) -> anyhow::Result<ExitCode> {
    let file = File::open(&args.file)
        .with_context(|| format!("cannot open {}", args.file.display()))?;
    let entries = import_jsonl(BufReader::new(file))
        .with_context(|| format!("cannot parse {}", args.file.display()))?;

    let sealer = match &args.seal_key {
        Some(key) => {
            let authority = args
                .authority
                .clone()
                .unwrap_or_else(|| config.ledger.sealing_authority.clone());
            Some(KeyedDigestSealer::new(authority, parse_key(key)?))
        }
        None => None,
    };

    let mut verifier = ChainVerifier::new();
    if let Some(sealer) = &sealer {
        verifier = verifier.with_seal_verifier(sealer);
    }
    if let (Some(length), Some(digest)) = (args.head_length, &args.head_digest) {
        let digest = Digest::from_hex(digest).context("invalid --head-digest")?;
        verifier = verifier.with_head(ChainHead { length, digest });
    }

    match verifier.verify(&entries) {
        ChainStatus::Valid { entries, head } => {
            println!("{} {} entries, head {}", "VALID".green().bold(), entries, head);
            Ok(ExitCode::SUCCESS)
        }
        ChainStatus::BrokenAt { index, reason } => {
            error!(index, %reason, file = %args.file.display(), "ledger chain broken");
            println!(
                "{} at index {}: {}",
                "BROKEN".red().bold(),
                index,
                reason
            );
            println!(
                "{}",
                "Entries from this index on must not be trusted.".dimmed()
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

fn parse_key(hex_key: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim()).context("seal key is not hex")?;
    let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice()) else {
        bail!("seal key must be 32 bytes, got {}", bytes.len());
    };
    Ok(key)
}
