//! Core types: DataKey, KeyMetadata, KeyUsage, HealthReport.

use crate::error::KeyVaultError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every data encryption key, in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Key identifier used when callers don't name one.
pub const DEFAULT_KEY_ID: &str = "default";

// ---------------------------------------------------------------------------
// Data encryption key
// ---------------------------------------------------------------------------

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct KeyBytes([u8; KEY_SIZE]);

/// A 32-byte data encryption key (DEK).
///
/// Zeroized on drop. `Debug` prints only the version; there is no `Display`.
#[derive(Clone)]
pub struct DataKey {
    bytes: KeyBytes,
    version: Option<String>,
}

impl DataKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            bytes: KeyBytes(bytes),
            version: None,
        }
    }

    /// Validate the length of raw key material returned by a vault.
    pub fn from_slice(key_id: &str, material: &[u8]) -> Result<Self, KeyVaultError> {
        let bytes: [u8; KEY_SIZE] =
            material
                .try_into()
                .map_err(|_| KeyVaultError::InvalidKeySize {
                    key_id: key_id.to_string(),
                    actual: material.len(),
                    expected: KEY_SIZE,
                })?;
        Ok(Self::new(bytes))
    }

    /// Decode base64 key material (the form vaults store secrets in).
    pub fn from_base64(key_id: &str, encoded: &str) -> Result<Self, KeyVaultError> {
        use base64::Engine;
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| {
                KeyVaultError::InvalidResponse(format!("secret {} is not valid base64", key_id))
            })?;
        let key = Self::from_slice(key_id, &raw);
        raw.zeroize();
        key
    }

    /// Fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        use rand_core::RngCore;
        let mut bytes = [0u8; KEY_SIZE];
        rand_core::OsRng.fill_bytes(&mut bytes);
        let key = Self::new(bytes);
        bytes.zeroize();
        key
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Raw key bytes. Use only to feed a cipher.
    pub fn expose_secret(&self) -> &[u8; KEY_SIZE] {
        &self.bytes.0
    }

    /// Base64 form, for writing into a vault.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.bytes.0)
    }
}

impl PartialEq for DataKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.0.ct_eq(&other.bytes.0).into()
    }
}

impl Eq for DataKey {}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("version", &self.version)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Provider-side metadata
// ---------------------------------------------------------------------------

/// What a provider knows about one key, as returned by `list_keys`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub version: Option<String>,
    /// Backend-specific status string ("active", "enabled", "disabled", ...).
    pub status: String,
    /// Anything else the backend reports (ARN, expiry, description).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Cache-side audit view
// ---------------------------------------------------------------------------

/// Local usage record for one key. Built without contacting the vault.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub key_id: String,
    pub last_access: Option<DateTime<Utc>>,
    pub last_rotation: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub rotation_needed: bool,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of probing the vault with `list_keys`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub vault_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
