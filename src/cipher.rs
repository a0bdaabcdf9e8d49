//! EnvelopeCipher: field values in, self-describing envelopes out.

use std::sync::Arc;

use chrono::Utc;
use phivault_keystore::{DataKey, KeyCacheError, KeyVaultManager};
use zeroize::Zeroizing;

use crate::aead;
use crate::config::CryptoSettings;
use crate::error::{EncryptionError, Operation};
use crate::wire::Envelope;

/// AES-256-GCM field cipher backed by the key cache.
///
/// `encrypt("") == ""` and `decrypt("") == ""`: empty values pass through
/// without an envelope. Everything else decrypts or fails with one uniform
/// [`EncryptionError::Rejected`].
pub struct EnvelopeCipher {
    keys: Arc<KeyVaultManager>,
    default_key_id: String,
    strict_rotation: bool,
}

impl EnvelopeCipher {
    pub fn new(keys: Arc<KeyVaultManager>) -> Self {
        Self::with_settings(keys, &CryptoSettings::default())
    }

    pub fn with_settings(keys: Arc<KeyVaultManager>, settings: &CryptoSettings) -> Self {
        Self {
            keys,
            default_key_id: settings.default_key_id.clone(),
            strict_rotation: settings.strict_rotation,
        }
    }

    pub fn keys(&self) -> &Arc<KeyVaultManager> {
        &self.keys
    }

    pub fn default_key_id(&self) -> &str {
        &self.default_key_id
    }

    /// Encrypt under `key_id` (or the default key) with a fresh random nonce.
    pub fn encrypt(
        &self,
        plaintext: &str,
        key_id: Option<&str>,
    ) -> Result<String, EncryptionError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let key_id = key_id.unwrap_or(self.default_key_id.as_str());
        let key = self.encryption_key(key_id)?;

        let nonce = aead::nonce().map_err(|_| EncryptionError::Cipher {
            key_id: key_id.to_string(),
        })?;
        let ciphertext = aead::aead_seal(key.expose_secret(), &nonce, plaintext.as_bytes())
            .map_err(|_| EncryptionError::Cipher {
                key_id: key_id.to_string(),
            })?;

        Ok(Envelope::new(key_id, nonce, ciphertext, Utc::now()).encode())
    }

    /// Decrypt an envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// Tries the current key for the envelope's key id first, then every
    /// historical version the provider still holds.
    pub fn decrypt(&self, envelope: &str) -> Result<String, EncryptionError> {
        if envelope.is_empty() {
            return Ok(String::new());
        }
        let envelope = Envelope::decode(envelope)?;
        let key_id = envelope.key_id.as_str();

        let current = self
            .keys
            .get_encryption_key(key_id)
            .or_else(KeyCacheError::into_key_or_vault_error)
            .map_err(|source| EncryptionError::KeyUnavailable {
                op: Operation::Decrypt,
                key_id: key_id.to_string(),
                source,
            })?;

        if let Some(plaintext) = open(&current, &envelope) {
            return into_string(plaintext, key_id);
        }

        // Written under an earlier key version?
        let history = match self.keys.historical_keys(key_id) {
            Ok(history) => history,
            Err(e) => {
                tracing::debug!(key_id, error = %e, "no key history for decryption fallback");
                return Err(rejected(key_id));
            }
        };
        for key in history.iter().filter(|k| **k != current) {
            if let Some(plaintext) = open(key, &envelope) {
                tracing::debug!(
                    key_id,
                    version = ?key.version(),
                    "decrypted with a previous key version"
                );
                return into_string(plaintext, key_id);
            }
        }
        Err(rejected(key_id))
    }

    /// `true` iff `value` is non-empty and decrypts.
    pub fn is_encrypted(&self, value: &str) -> bool {
        !value.is_empty() && self.decrypt(value).is_ok()
    }

    fn encryption_key(&self, key_id: &str) -> Result<DataKey, EncryptionError> {
        match self.keys.get_encryption_key(key_id) {
            Ok(key) => Ok(key),
            Err(KeyCacheError::RotationRequired(signal)) => {
                if self.strict_rotation {
                    return Err(EncryptionError::RotationRequired {
                        key_id: key_id.to_string(),
                    });
                }
                tracing::debug!(key_id, "key rotation due; encrypting with current key");
                Ok(signal.into_key())
            }
            Err(KeyCacheError::Vault(source)) => Err(EncryptionError::KeyUnavailable {
                op: Operation::Encrypt,
                key_id: key_id.to_string(),
                source,
            }),
        }
    }
}

fn open(key: &DataKey, envelope: &Envelope) -> Option<Zeroizing<Vec<u8>>> {
    aead::aead_open(key.expose_secret(), &envelope.nonce, &envelope.ciphertext)
        .ok()
        .map(Zeroizing::new)
}

fn into_string(plaintext: Zeroizing<Vec<u8>>, key_id: &str) -> Result<String, EncryptionError> {
    String::from_utf8(plaintext.to_vec()).map_err(|_| rejected(key_id))
}

fn rejected(key_id: &str) -> EncryptionError {
    EncryptionError::Rejected {
        key_id: Some(key_id.to_string()),
    }
}
