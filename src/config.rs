//! Cipher and search-hash settings.

use phivault_keystore::{KeyVaultError, DEFAULT_KEY_ID};
use std::fmt;

#[derive(Clone)]
pub struct CryptoSettings {
    /// Key id used when `encrypt` is not given one.
    pub default_key_id: String,
    /// HMAC key for search tokens. `None` falls back to the development salt.
    pub search_salt: Option<String>,
    /// Fail `encrypt` instead of logging when the key is due for rotation.
    pub strict_rotation: bool,
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            default_key_id: DEFAULT_KEY_ID.to_string(),
            search_salt: None,
            strict_rotation: false,
        }
    }
}

impl fmt::Debug for CryptoSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoSettings")
            .field("default_key_id", &self.default_key_id)
            .field("search_salt", &self.search_salt.as_ref().map(|_| "[REDACTED]"))
            .field("strict_rotation", &self.strict_rotation)
            .finish()
    }
}

impl CryptoSettings {
    pub fn from_env() -> Result<Self, KeyVaultError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads `PHIVAULT_DEFAULT_KEY_ID`, `PHIVAULT_SEARCH_SALT` and
    /// `PHIVAULT_STRICT_ROTATION`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, KeyVaultError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let strict_rotation = match lookup("PHIVAULT_STRICT_ROTATION") {
            None => false,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(KeyVaultError::Misconfigured(format!(
                        "PHIVAULT_STRICT_ROTATION must be a boolean, got {:?}",
                        raw
                    )))
                }
            },
        };
        Ok(Self {
            default_key_id: lookup("PHIVAULT_DEFAULT_KEY_ID")
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| DEFAULT_KEY_ID.to_string()),
            search_salt: lookup("PHIVAULT_SEARCH_SALT").filter(|s| !s.is_empty()),
            strict_rotation,
        })
    }
}
