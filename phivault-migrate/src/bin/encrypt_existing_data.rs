//! Encrypt existing PHI columns into their `_encrypted` counterparts.
//!
//! # Usage
//!
//! ```bash
//! # Preview one model
//! encrypt-existing-data --data records.json --model Contact --dry-run
//!
//! # Everything, with an encrypted backup first
//! encrypt-existing-data --data records.json --all-models --batch-size 500 --backup-path backup.json
//!
//! # Check that every ciphertext opens and matches its source
//! encrypt-existing-data --data records.json --verify-only
//! ```
//!
//! Exit status: 0 on success, 1 on any record error or verification issue,
//! 2 on bad arguments.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser};
use eyre::WrapErr;
use phivault_migrate::cli;
use phivault_migrate::{
    JsonFileRecordStore, MigrationOptions, MigrationRunner, ModelRegistry, DEFAULT_BATCH_SIZE,
};

/// Encrypt existing PHI data into encrypted columns
#[derive(Parser, Debug)]
#[command(name = "encrypt-existing-data")]
#[command(about = "Encrypt existing PHI data into encrypted columns")]
#[command(group(
    ArgGroup::new("scope")
        .required(true)
        .multiple(true)
        .args(["model", "all_models", "verify_only"])
))]
struct Args {
    /// JSON record store to migrate
    #[arg(long, env = "PHIVAULT_DATA")]
    data: PathBuf,

    /// Model mapping file (JSON); defaults to the built-in PHI columns
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// Specific model to encrypt (e.g. Contact, Patient)
    #[arg(long)]
    model: Option<String>,

    /// Encrypt all models with PHI data
    #[arg(long, conflicts_with = "model")]
    all_models: bool,

    /// Records per batch; the store is flushed after each batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_parser = parse_batch_size)]
    batch_size: usize,

    /// Maximum number of records per model
    #[arg(long)]
    limit: Option<usize>,

    /// Show what would be encrypted without making changes
    #[arg(long)]
    dry_run: bool,

    /// Verify existing encrypted data instead of migrating
    #[arg(long)]
    verify_only: bool,

    /// Re-encrypt values that are already encrypted
    #[arg(long)]
    force: bool,

    /// Write an encrypted backup of all source values before migrating
    #[arg(long)]
    backup_path: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_batch_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("batch size must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_tracing(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> eyre::Result<ExitCode> {
    let encryption = cli::encryption_from_env()?;
    let registry = match &args.mapping {
        Some(path) => ModelRegistry::from_json_file(path)?,
        None => ModelRegistry::phi_defaults(),
    };
    let mut store = JsonFileRecordStore::open(&args.data)
        .wrap_err_with(|| format!("opening record store {}", args.data.display()))?;

    let options = MigrationOptions {
        dry_run: args.dry_run,
        force: args.force,
        batch_size: args.batch_size,
        limit: args.limit,
    };
    let runner = MigrationRunner::new(encryption, registry, options);

    if args.verify_only {
        println!("Verifying encrypted data integrity...");
        let report = runner.verify(&store, args.model.as_deref())?;
        print!("{}", cli::render_verification(&report));
        return Ok(cli::exit_code(report.is_clean()));
    }

    if let Some(path) = &args.backup_path {
        println!("Creating backup at: {}", path.display());
        let backup = runner.backup(path, &store)?;
        println!("Backup created: {} records", backup.record_count());
    }

    let models: Vec<String> = match &args.model {
        Some(model) => vec![model.clone()],
        None => runner
            .registry()
            .model_names()
            .into_iter()
            .map(String::from)
            .collect(),
    };
    let report = runner.run(&mut store, &models)?;
    print!("{}", cli::render_migration(&report));
    Ok(cli::exit_code(report.is_success()))
}
