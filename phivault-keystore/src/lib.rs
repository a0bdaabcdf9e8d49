//! # phivault keystore
//!
//! Key management for field-level PHI encryption.
//!
//! A [`KeyProvider`] hands out 32-byte data keys by key id. Three backends
//! implement it: [`LocalDevProvider`] (deterministic, development only),
//! [`AzureKeyVaultProvider`] and [`AwsSecretsProvider`]. The
//! [`KeyVaultManager`] fronts the chosen provider with a TTL cache, serializes
//! vault fetches and tracks when each key is due for rotation.
//!
//! ## Quick Start
//!
//! ```
//! use phivault_keystore::*;
//!
//! let manager = KeyVaultManager::from_config(&VaultConfig::development()).unwrap();
//!
//! // The first fetch goes to the provider; later ones come from the cache.
//! let key = manager.get_encryption_key(DEFAULT_KEY_ID).unwrap();
//!
//! // A cache hit on a key that was never rotated reports rotation as due,
//! // but still hands back the key.
//! let again = manager
//!     .get_encryption_key(DEFAULT_KEY_ID)
//!     .or_else(KeyCacheError::into_key_or_vault_error)
//!     .unwrap();
//! assert_eq!(key, again);
//!
//! assert!(manager.rotate_key(DEFAULT_KEY_ID).unwrap());
//! assert!(!manager.is_rotation_needed(DEFAULT_KEY_ID));
//! ```

pub mod aws;
pub mod azure;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
mod http;
pub mod local;
pub mod manager;
pub mod provider;
pub mod sigv4;
pub mod types;

// Re-export main types for convenience
pub use aws::AwsSecretsProvider;
pub use azure::AzureKeyVaultProvider;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AwsSettings, AzureSettings, CacheSettings, KeyProviderKind, RuntimeMode, VaultConfig,
};
pub use error::{KeyCacheError, KeyRotationRequired, KeyVaultError};
pub use events::{
    InMemoryEventSink, KeyAction, KeyEvent, KeyEventSink, NullEventSink, TracingEventSink,
};
pub use local::LocalDevProvider;
pub use manager::KeyVaultManager;
pub use provider::{provider_from_config, KeyProvider};
pub use types::{
    DataKey, HealthReport, HealthStatus, KeyMetadata, KeyUsage, DEFAULT_KEY_ID, KEY_SIZE,
};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
