//! Error types for key providers and the key cache.

use crate::types::DataKey;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Provider errors
// ---------------------------------------------------------------------------

/// Failure to obtain, create, rotate or list keys.
///
/// Messages name the key and the backend problem, never key material.
#[derive(Debug, Error)]
pub enum KeyVaultError {
    /// Network failure, timeout or connection refused.
    #[error("key vault unreachable: {0}")]
    Unreachable(String),

    /// Missing or invalid configuration (URL, credentials, runtime mode).
    #[error("key vault misconfigured: {0}")]
    Misconfigured(String),

    /// The vault rejected our credentials (401/403).
    #[error("key vault rejected credentials: {0}")]
    Unauthorized(String),

    /// No key with this identifier exists in the vault.
    #[error("key not found: {key_id}")]
    KeyNotFound { key_id: String },

    /// The vault returned key material of the wrong length.
    #[error("invalid key size for {key_id}: {actual} bytes, expected {expected}")]
    InvalidKeySize {
        key_id: String,
        actual: usize,
        expected: usize,
    },

    /// The vault answered, but not with anything we can use.
    #[error("unexpected key vault response: {0}")]
    InvalidResponse(String),
}

impl KeyVaultError {
    pub fn not_found(key_id: impl Into<String>) -> Self {
        Self::KeyNotFound {
            key_id: key_id.into(),
        }
    }

    /// Whether retrying later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

// ---------------------------------------------------------------------------
// Rotation signal
// ---------------------------------------------------------------------------

/// Soft signal: the key is still valid but its rotation interval has elapsed.
///
/// Carries the key so callers can keep working and schedule a rotation, or
/// treat the signal as fatal.
#[derive(Debug, Error)]
#[error("key {key_id} requires rotation")]
pub struct KeyRotationRequired {
    key_id: String,
    key: DataKey,
}

impl KeyRotationRequired {
    pub(crate) fn new(key_id: impl Into<String>, key: DataKey) -> Self {
        Self {
            key_id: key_id.into(),
            key,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Take the (still usable) key out of the signal.
    pub fn into_key(self) -> DataKey {
        self.key
    }
}

// ---------------------------------------------------------------------------
// Cache lookup errors
// ---------------------------------------------------------------------------

/// Outcome of a failed [`KeyVaultManager::get_encryption_key`](crate::KeyVaultManager::get_encryption_key).
#[derive(Debug, Error)]
pub enum KeyCacheError {
    #[error(transparent)]
    Vault(#[from] KeyVaultError),

    #[error(transparent)]
    RotationRequired(#[from] KeyRotationRequired),
}

impl KeyCacheError {
    /// Resolve the soft rotation signal into its key; pass hard failures through.
    pub fn into_key_or_vault_error(self) -> Result<DataKey, KeyVaultError> {
        match self {
            Self::RotationRequired(signal) => Ok(signal.into_key()),
            Self::Vault(e) => Err(e),
        }
    }
}
