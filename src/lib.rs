//! # phivault
//!
//! Field-level encryption for PHI/PII columns.
//!
//! ## Quick Start
//!
//! ```rust
//! use phivault::{CryptoSettings, EnvelopeCipher, SearchHasher};
//! use phivault::keystore::{KeyVaultManager, VaultConfig};
//! use std::sync::Arc;
//!
//! let keys = Arc::new(KeyVaultManager::from_config(&VaultConfig::development()).unwrap());
//! let cipher = EnvelopeCipher::new(keys);
//!
//! let envelope = cipher.encrypt("123-45-6789", Some("default")).unwrap();
//! assert_eq!(cipher.decrypt(&envelope).unwrap(), "123-45-6789");
//!
//! let hasher = SearchHasher::new(Some("pepper".into()));
//! assert_eq!(
//!     hasher.generate_search_hash("Jane@Example.com", None),
//!     hasher.generate_search_hash("jane@example.com", None),
//! );
//! ```
//!
//! ## Security Properties
//!
//! - **AES-256-GCM**: fresh random 96-bit nonce per value
//! - **Uniform errors**: malformed, mismatched and forged envelopes fail alike
//! - **Self-describing envelopes**: version, algorithm and key id travel with the data
//! - **Rotation-tolerant**: envelopes written before a rotation still decrypt
//!
//! ## What's NOT Provided
//!
//! - Record storage (see `phivault-migrate` for the store interface)
//! - Searching other than exact, case-insensitive equality

#![deny(unsafe_code)]

mod aead;
pub mod cipher;
pub mod config;
pub mod error;
pub mod field;
pub mod search;
pub mod wire;

pub use phivault_keystore as keystore;

pub use cipher::EnvelopeCipher;
pub use config::CryptoSettings;
pub use error::{EncryptionError, MalformedEnvelope, Operation};
pub use field::{FieldEncryption, SealedField};
pub use search::{SearchHasher, DEFAULT_SEARCH_SALT};
pub use wire::{Envelope, ALGORITHM, ENVELOPE_VERSION};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
