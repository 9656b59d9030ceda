//! CLI driver (SPEC_FULL.md "AMBIENT STACK"): not part of the core library,
//! exists only to make the crate runnable from a shell.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use zb_forensics::decode::security::DecryptPolicy;
use zb_forensics::keyring::KeyRing;
use zb_forensics::{analysis, config::Config, store::Store};

#[derive(Parser)]
#[command(name = "zb-forensics", about = "Forensic analyzer for captured IEEE 802.15.4/Zigbee traffic")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parses every capture file in a directory and writes a fresh database.
    Parse {
        pcap_dir: PathBuf,
        db_path: PathBuf,
        #[arg(long)]
        network_keys: Option<PathBuf>,
        #[arg(long)]
        link_keys: Option<PathBuf>,
        #[arg(long)]
        install_codes: Option<PathBuf>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, value_enum, default_value = "strict")]
        decrypt_policy: DecryptPolicyArg,
    },
    /// Recomputes the InferenceEngine's derived tables from packets already
    /// written by a prior `parse` run.
    Finalize {
        db_path: PathBuf,
        #[arg(long, value_enum, default_value = "strict")]
        decrypt_policy: DecryptPolicyArg,
    },
    /// Re-runs field-value export against an already-finalized database.
    FieldValues { db_path: PathBuf, out_dir: PathBuf },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DecryptPolicyArg {
    Strict,
    TryLinkKeys,
}

impl From<DecryptPolicyArg> for DecryptPolicy {
    fn from(arg: DecryptPolicyArg) -> Self {
        match arg {
            DecryptPolicyArg::Strict => DecryptPolicy::Strict,
            DecryptPolicyArg::TryLinkKeys => DecryptPolicy::TryLinkKeys,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Parse {
            pcap_dir,
            db_path,
            network_keys,
            link_keys,
            install_codes,
            workers,
            decrypt_policy,
        } => {
            let mut config = Config::default();
            config.network_keys_path = network_keys;
            config.link_keys_path = link_keys;
            config.install_codes_path = install_codes;
            let keyring: KeyRing = config.build_keyring().context("loading key-tablet files")?;

            let worker_count = workers.unwrap_or_else(|| {
                std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
            });

            let count = zb_forensics::parse_capture_dir(
                pcap_dir,
                db_path,
                keyring,
                decrypt_policy.into(),
                worker_count,
            )
            .context("parsing capture directory")?;
            println!("wrote {} packet record(s)", count);
        }
        Command::Finalize { db_path, decrypt_policy } => {
            let count = zb_forensics::finalize_corpus(db_path, decrypt_policy.into())
                .context("finalizing corpus")?;
            println!("finalized {} packet record(s)", count);
        }
        Command::FieldValues { db_path, out_dir } => {
            let store = Store::open(db_path).context("opening database")?;
            analysis::field_values::export(&store, &out_dir).context("exporting field values")?;
        }
    }

    Ok(())
}
