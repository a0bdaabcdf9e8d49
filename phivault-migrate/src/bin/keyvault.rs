//! Key vault administration: self-test, health, listing, rotation, audit.
//!
//! # Usage
//!
//! ```bash
//! keyvault self-test
//! keyvault health
//! keyvault list
//! keyvault rotate default
//! keyvault audit default
//! keyvault hash jane.doe@example.com
//! ```

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use phivault::FieldEncryption;
use phivault_keystore::KeyCacheError;
use phivault_migrate::cli;

#[derive(Parser, Debug)]
#[command(name = "keyvault")]
#[command(about = "Inspect and manage field-encryption keys")]
struct Args {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check key retrieval, encryption round trip, search hashing and vault health
    SelfTest,
    /// Probe the key vault
    Health,
    /// List keys known to the vault
    List,
    /// Issue a new version of a key
    Rotate { key_id: String },
    /// Show this process's usage record for a key
    Audit { key_id: String },
    /// Print the search token for a value
    Hash {
        value: String,
        /// Salt to use instead of PHIVAULT_SEARCH_SALT
        #[arg(long)]
        salt: Option<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_tracing(args.verbose);

    match run(args.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(command: Command) -> eyre::Result<ExitCode> {
    let encryption = cli::encryption_from_env()?;
    let keys = encryption.keys();

    match command {
        Command::SelfTest => Ok(cli::exit_code(self_test(&encryption))),
        Command::Health => {
            let report = keys.health_check();
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(cli::exit_code(report.is_healthy()))
        }
        Command::List => {
            let listed = keys.provider().list_keys().wrap_err("listing keys")?;
            println!("{}", serde_json::to_string_pretty(&listed)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Rotate { key_id } => {
            keys.rotate_key(&key_id)
                .wrap_err_with(|| format!("rotating {}", key_id))?;
            let usage = keys.audit_key_usage(&key_id);
            println!(
                "Rotated {} (version {})",
                key_id,
                usage.version.as_deref().unwrap_or("unknown")
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Audit { key_id } => {
            println!("{}", serde_json::to_string_pretty(&keys.audit_key_usage(&key_id))?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Hash { value, salt } => {
            println!("{}", encryption.generate_search_hash(&value, salt.as_deref()));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn self_test(encryption: &FieldEncryption) -> bool {
    let mut ok = true;
    let mut check = |step: &str, result: Result<String, String>| match result {
        Ok(detail) => println!("  ok    {:<22} {}", step, detail),
        Err(detail) => {
            ok = false;
            println!("  FAIL  {:<22} {}", step, detail);
        }
    };

    let key_id = encryption.cipher().default_key_id().to_string();
    let retrieval = match encryption.keys().get_encryption_key(&key_id) {
        Ok(key) => Ok(format!("{} ({} bytes)", key_id, key.expose_secret().len())),
        Err(KeyCacheError::RotationRequired(signal)) => Ok(format!(
            "{} ({} bytes, rotation due)",
            key_id,
            signal.into_key().expose_secret().len()
        )),
        Err(KeyCacheError::Vault(e)) => Err(e.to_string()),
    };
    check("key retrieval", retrieval);

    let sample = "Test PHI Data - John Doe";
    let roundtrip = encryption
        .encrypt(sample, None)
        .and_then(|sealed| encryption.decrypt(&sealed))
        .map_err(|e| e.to_string())
        .and_then(|opened| {
            if opened == sample {
                Ok("encrypt/decrypt".to_string())
            } else {
                Err("decrypted value differs".to_string())
            }
        });
    check("round trip", roundtrip);

    let a = encryption.generate_search_hash("test@example.com", None);
    let b = encryption.generate_search_hash("TEST@example.com", None);
    check(
        "search hash",
        if a == b && !a.is_empty() {
            Ok("consistent".to_string())
        } else {
            Err("not consistent".to_string())
        },
    );

    let health = encryption.keys().health_check();
    check(
        "vault health",
        match &health.error {
            None => Ok(format!("{} {}", health.vault_type, health.status)),
            Some(error) => Err(format!("{} {}: {}", health.vault_type, health.status, error)),
        },
    );

    ok
}
