//! FieldEncryption: one handle for the cipher and the search hasher.

use std::sync::Arc;

use phivault_keystore::{KeyVaultError, KeyVaultManager, VaultConfig};

use crate::cipher::EnvelopeCipher;
use crate::config::CryptoSettings;
use crate::error::EncryptionError;
use crate::search::SearchHasher;

/// Ciphertext plus companion search token for a searchable column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedField {
    pub ciphertext: String,
    /// Empty when the value was empty.
    pub search_hash: String,
}

pub struct FieldEncryption {
    cipher: EnvelopeCipher,
    hasher: SearchHasher,
}

impl FieldEncryption {
    pub fn new(keys: Arc<KeyVaultManager>, settings: &CryptoSettings) -> Self {
        Self {
            cipher: EnvelopeCipher::with_settings(keys, settings),
            hasher: SearchHasher::new(settings.search_salt.clone()),
        }
    }

    /// Vault and cipher settings from the process environment.
    pub fn from_env() -> Result<Self, KeyVaultError> {
        let vault = VaultConfig::from_env()?;
        let settings = CryptoSettings::from_env()?;
        Self::from_config(&vault, &settings)
    }

    pub fn from_config(
        vault: &VaultConfig,
        settings: &CryptoSettings,
    ) -> Result<Self, KeyVaultError> {
        let keys = Arc::new(KeyVaultManager::from_config(vault)?);
        Ok(Self::new(keys, settings))
    }

    pub fn encrypt(
        &self,
        plaintext: &str,
        key_id: Option<&str>,
    ) -> Result<String, EncryptionError> {
        self.cipher.encrypt(plaintext, key_id)
    }

    pub fn decrypt(&self, envelope: &str) -> Result<String, EncryptionError> {
        self.cipher.decrypt(envelope)
    }

    pub fn is_encrypted(&self, value: &str) -> bool {
        self.cipher.is_encrypted(value)
    }

    pub fn generate_search_hash(&self, value: &str, salt: Option<&str>) -> String {
        self.hasher.generate_search_hash(value, salt)
    }

    /// Encrypt `value` and compute its search token in one step.
    pub fn seal_searchable(&self, value: &str) -> Result<SealedField, EncryptionError> {
        Ok(SealedField {
            ciphertext: self.cipher.encrypt(value, None)?,
            search_hash: self.hasher.generate_search_hash(value, None),
        })
    }

    pub fn cipher(&self) -> &EnvelopeCipher {
        &self.cipher
    }

    pub fn hasher(&self) -> &SearchHasher {
        &self.hasher
    }

    pub fn keys(&self) -> &Arc<KeyVaultManager> {
        self.cipher.keys()
    }
}
