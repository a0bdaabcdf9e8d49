//! Pieces shared by the command-line tools.

use std::process::ExitCode;

use eyre::WrapErr;
use phivault::FieldEncryption;
use tracing_subscriber::EnvFilter;

use crate::runner::{MigrationReport, VerificationReport};

const DEFAULT_FILTER: &str = "phivault=info,encrypt_existing_data=info,keyvault=info";
const VERBOSE_FILTER: &str = "phivault=debug,encrypt_existing_data=debug,keyvault=debug";

/// Logs go to stderr; stdout carries the report. `RUST_LOG` wins over
/// `verbose`. `PHIVAULT_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(verbose: bool) {
    let log_format = std::env::var("PHIVAULT_LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    if log_format == "json" {
        builder.json().with_target(true).with_thread_ids(true).init();
    } else {
        builder.init();
    }
}

/// Field encryption configured from the process environment.
pub fn encryption_from_env() -> eyre::Result<FieldEncryption> {
    FieldEncryption::from_env().wrap_err("loading key vault configuration")
}

pub fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

// ---------------------------------------------------------------------------
// Report rendering
// ---------------------------------------------------------------------------

pub fn render_migration(report: &MigrationReport) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();

    if !report.planned.is_empty() {
        for line in &report.planned {
            out.push_str(&format!("Would encrypt: {}\n", line));
        }
        out.push('\n');
    }

    for model in &report.models {
        out.push_str(&format!(
            "{:<12} records={:<6} batches={:<4} encrypted={:<6} skipped={:<6} errors={}\n",
            model.model,
            model.total,
            model.batches,
            model.stats.encrypted,
            model.stats.skipped,
            model.stats.errors
        ));
    }

    let mode = if report.dry_run { " (dry run)" } else { "" };
    out.push_str(&format!("\n{}\nMIGRATION SUMMARY{}\n{}\n", rule, mode, rule));
    out.push_str(&format!("Total records processed: {}\n", report.totals.processed));
    out.push_str(&format!("Successfully encrypted: {}\n", report.totals.encrypted));
    out.push_str(&format!("Already encrypted (skipped): {}\n", report.totals.skipped));
    out.push_str(&format!("Errors: {}\n", report.totals.errors));

    if !report.failures.is_empty() {
        out.push_str("\nError details:\n");
        for failure in &report.failures {
            out.push_str(&format!("  - {}\n", failure));
        }
    }

    out.push_str(&format!("\nSuccess rate: {:.1}%\n", report.success_rate()));
    if report.cancelled {
        out.push_str("Migration cancelled before all batches ran.\n");
    }
    if report.is_success() {
        out.push_str("Migration completed successfully.\n");
    } else {
        out.push_str("Migration completed with errors. Review the error details above.\n");
    }
    out
}

pub fn render_verification(report: &VerificationReport) -> String {
    let mut out = String::new();
    for issue in &report.issues {
        out.push_str(&format!("{}\n", issue));
    }
    out.push_str("\nVerification complete:\n");
    out.push_str(&format!("  Total fields verified: {}\n", report.verified));
    out.push_str(&format!("  Total errors: {}\n", report.issues.len()));
    if report.is_clean() {
        out.push_str("All encrypted data verified successfully.\n");
    } else {
        out.push_str(&format!("Verification failed with {} errors.\n", report.issues.len()));
    }
    out
}
