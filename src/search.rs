//! Search tokens: keyed hashes that allow equality lookups over encrypted columns.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Used only when no salt is configured. Tokens made with it are guessable.
pub const DEFAULT_SEARCH_SALT: &str = "default-search-salt-change-in-production";

/// Lowercase hex HMAC-SHA256 of the case-folded value, keyed by a salt.
///
/// Deterministic in `(value, salt)`, so equal values (ignoring case) produce
/// equal tokens. Supports equality only: no prefix, range or fuzzy search.
pub struct SearchHasher {
    salt: Zeroizing<String>,
}

impl SearchHasher {
    pub fn new(salt: Option<String>) -> Self {
        let salt = match salt {
            Some(s) => s,
            None => {
                tracing::warn!("no search salt configured; using the development default");
                DEFAULT_SEARCH_SALT.to_string()
            }
        };
        Self {
            salt: Zeroizing::new(salt),
        }
    }

    /// Token for `value`, keyed by `salt` if given, else the configured salt.
    /// Empty input yields an empty token.
    pub fn generate_search_hash(&self, value: &str, salt: Option<&str>) -> String {
        if value.is_empty() {
            return String::new();
        }
        let key = salt.unwrap_or(self.salt.as_str());
        hex::encode(Self::mac(key, &value.to_lowercase()))
    }

    /// Whether `token` is the token of `value` under the configured salt.
    pub fn matches(&self, value: &str, token: &str) -> bool {
        let expected = self.generate_search_hash(value, None);
        if expected.is_empty() || expected.len() != token.len() {
            return false;
        }
        expected.as_bytes().ct_eq(token.as_bytes()).into()
    }

    fn mac(key: &str, message: &str) -> [u8; 32] {
        let mut mac = match HmacSha256::new_from_slice(key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 takes keys of any length"),
        };
        mac.update(message.as_bytes());
        mac.finalize().into_bytes().into()
    }
}

impl std::fmt::Debug for SearchHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchHasher").finish_non_exhaustive()
    }
}
