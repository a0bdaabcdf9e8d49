//! Deterministic development provider.
//!
//! Keys are derived from the key id with SHA-256, so every developer machine
//! and every test run sees the same keys. Refuses to exist outside
//! development mode.

use crate::config::RuntimeMode;
use crate::error::KeyVaultError;
use crate::provider::KeyProvider;
use crate::types::{DataKey, KeyMetadata, DEFAULT_KEY_ID, KEY_SIZE};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug)]
struct DevKeyState {
    version: u32,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

/// Development-only provider with deterministic, versioned keys.
///
/// Version 1 of `key_id` is `SHA-256("dev-key-{key_id}")`; version `n > 1`
/// is `SHA-256("dev-key-{key_id}-{n}")`. Labels are `dev-{n}`.
#[derive(Debug)]
pub struct LocalDevProvider {
    keys: RwLock<BTreeMap<String, DevKeyState>>,
}

impl LocalDevProvider {
    pub fn new(mode: RuntimeMode) -> Result<Self, KeyVaultError> {
        if !mode.is_development() {
            return Err(KeyVaultError::Misconfigured(
                "the development key provider can only be used in development mode".into(),
            ));
        }
        tracing::warn!("using deterministic development keys; never use in production");
        Ok(Self {
            keys: RwLock::new(BTreeMap::new()),
        })
    }

    fn derive(key_id: &str, version: u32) -> DataKey {
        let seed = if version <= 1 {
            format!("dev-key-{}", key_id)
        } else {
            format!("dev-key-{}-{}", key_id, version)
        };
        let digest: [u8; KEY_SIZE] = Sha256::digest(seed.as_bytes()).into();
        DataKey::new(digest).with_version(Self::label(version))
    }

    fn label(version: u32) -> String {
        format!("dev-{}", version)
    }

    /// Current version of `key_id`, registering it on first sight.
    fn current(&self, key_id: &str) -> DevKeyState {
        if let Some(state) = self.keys.read().get(key_id) {
            return *state;
        }
        let now = Utc::now();
        *self
            .keys
            .write()
            .entry(key_id.to_string())
            .or_insert(DevKeyState {
                version: 1,
                created: now,
                updated: now,
            })
    }
}

impl KeyProvider for LocalDevProvider {
    fn name(&self) -> &'static str {
        "development"
    }

    fn get_key(&self, key_id: &str) -> Result<DataKey, KeyVaultError> {
        Ok(Self::derive(key_id, self.current(key_id).version))
    }

    fn create_key(&self, key_id: &str, size: usize) -> Result<DataKey, KeyVaultError> {
        if size != KEY_SIZE {
            return Err(KeyVaultError::InvalidKeySize {
                key_id: key_id.to_string(),
                actual: size,
                expected: KEY_SIZE,
            });
        }
        self.get_key(key_id)
    }

    fn rotate_key(&self, key_id: &str) -> Result<(DataKey, String), KeyVaultError> {
        let now = Utc::now();
        let mut keys = self.keys.write();
        let state = keys.entry(key_id.to_string()).or_insert(DevKeyState {
            version: 1,
            created: now,
            updated: now,
        });
        state.version += 1;
        state.updated = now;
        let version = state.version;
        drop(keys);

        Ok((Self::derive(key_id, version), Self::label(version)))
    }

    fn list_keys(&self) -> Result<BTreeMap<String, KeyMetadata>, KeyVaultError> {
        self.current(DEFAULT_KEY_ID);
        Ok(self
            .keys
            .read()
            .iter()
            .map(|(key_id, state)| {
                (
                    key_id.clone(),
                    KeyMetadata {
                        created: Some(state.created),
                        updated: Some(state.updated),
                        version: Some(Self::label(state.version)),
                        status: "active".into(),
                        extra: BTreeMap::new(),
                    },
                )
            })
            .collect())
    }

    fn key_versions(&self, key_id: &str) -> Result<Vec<DataKey>, KeyVaultError> {
        let current = self.current(key_id).version;
        Ok((1..=current).rev().map(|v| Self::derive(key_id, v)).collect())
    }
}
