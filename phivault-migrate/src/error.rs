//! Error types for stores, backups and migration runs.

use std::path::PathBuf;

use phivault::EncryptionError;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store format: {0}")]
    Format(#[from] serde_json::Error),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("unknown record: {model} {pk}")]
    UnknownRecord { model: String, pk: String },

    #[error("unknown field: {model}.{field}")]
    UnknownField { model: String, field: String },
}

// ---------------------------------------------------------------------------
// Migration run
// ---------------------------------------------------------------------------

/// Failures that stop a run. Per-record failures are counted in the report
/// instead.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown model: {name}. Available: {available}")]
    UnknownModel { name: String, available: String },

    #[error("invalid model mapping: {0}")]
    Mapping(String),

    #[error("backup {path}: {source}")]
    BackupIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup {path}: {source}")]
    BackupFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("backup encryption failed: {0}")]
    BackupEncryption(#[source] EncryptionError),
}
