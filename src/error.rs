//! Error types for field encryption.

use core::fmt;
use phivault_keystore::KeyVaultError;
use thiserror::Error;

/// The envelope could not be parsed. Carries no detail on purpose: every
/// decoding failure looks the same to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedEnvelope;

impl fmt::Display for MalformedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed envelope")
    }
}

impl std::error::Error for MalformedEnvelope {}

/// Which side of the cipher failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Encrypt => write!(f, "encrypt"),
            Operation::Decrypt => write!(f, "decrypt"),
        }
    }
}

/// Failure of [`EnvelopeCipher`](crate::EnvelopeCipher). Never contains plaintext.
#[derive(Debug, Error)]
pub enum EncryptionError {
    /// Malformed base64 or JSON, missing or unknown fields, version or
    /// algorithm mismatch, authentication failure. All identical on purpose.
    #[error("decryption failed")]
    Rejected { key_id: Option<String> },

    /// The key cache could not produce a key.
    #[error("{op} failed: key {key_id:?} unavailable")]
    KeyUnavailable {
        op: Operation,
        key_id: String,
        #[source]
        source: KeyVaultError,
    },

    /// Strict rotation is on and the key's rotation interval has elapsed.
    #[error("encrypt refused: key {key_id:?} requires rotation")]
    RotationRequired { key_id: String },

    /// Nonce generation or the AEAD primitive failed while encrypting.
    #[error("encryption failed")]
    Cipher { key_id: String },
}

impl EncryptionError {
    pub(crate) fn rejected() -> Self {
        Self::Rejected { key_id: None }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Rejected { .. } => Operation::Decrypt,
            Self::KeyUnavailable { op, .. } => *op,
            Self::RotationRequired { .. } | Self::Cipher { .. } => Operation::Encrypt,
        }
    }

    pub fn key_id(&self) -> Option<&str> {
        match self {
            Self::Rejected { key_id } => key_id.as_deref(),
            Self::KeyUnavailable { key_id, .. }
            | Self::RotationRequired { key_id }
            | Self::Cipher { key_id } => Some(key_id),
        }
    }

    /// Whether the input itself was bad (as opposed to the key vault).
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<MalformedEnvelope> for EncryptionError {
    fn from(_: MalformedEnvelope) -> Self {
        Self::rejected()
    }
}
