//! The key provider interface and its resolution from configuration.

use crate::config::{KeyProviderKind, VaultConfig};
use crate::error::KeyVaultError;
use crate::types::{DataKey, KeyMetadata};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A source of 32-byte data keys, addressed by key id.
///
/// Every backend honors the same contract, so a backend can be swapped for
/// another without touching callers. Stored ciphertext does not migrate with
/// it: keys are not portable across backends.
pub trait KeyProvider: Send + Sync {
    /// Short backend name used in health reports and events.
    fn name(&self) -> &'static str;

    /// Current version of the key.
    fn get_key(&self, key_id: &str) -> Result<DataKey, KeyVaultError>;

    /// Create (or overwrite) the key with fresh material of `size` bytes.
    fn create_key(&self, key_id: &str, size: usize) -> Result<DataKey, KeyVaultError>;

    /// Issue a new version and return it with its version label.
    fn rotate_key(&self, key_id: &str) -> Result<(DataKey, String), KeyVaultError>;

    fn list_keys(&self) -> Result<BTreeMap<String, KeyMetadata>, KeyVaultError>;

    /// Every retrievable version of the key, newest first.
    ///
    /// Backends that cannot enumerate history return only the current key.
    /// Decrypting data written before a rotation depends on the backend
    /// retaining superseded versions.
    fn key_versions(&self, key_id: &str) -> Result<Vec<DataKey>, KeyVaultError> {
        Ok(vec![self.get_key(key_id)?])
    }
}

impl<P: KeyProvider + ?Sized> KeyProvider for Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn get_key(&self, key_id: &str) -> Result<DataKey, KeyVaultError> {
        (**self).get_key(key_id)
    }

    fn create_key(&self, key_id: &str, size: usize) -> Result<DataKey, KeyVaultError> {
        (**self).create_key(key_id, size)
    }

    fn rotate_key(&self, key_id: &str) -> Result<(DataKey, String), KeyVaultError> {
        (**self).rotate_key(key_id)
    }

    fn list_keys(&self) -> Result<BTreeMap<String, KeyMetadata>, KeyVaultError> {
        (**self).list_keys()
    }

    fn key_versions(&self, key_id: &str) -> Result<Vec<DataKey>, KeyVaultError> {
        (**self).key_versions(key_id)
    }
}

/// Collect the versions that could be read, keeping their order.
///
/// A version that is missing or holds unusable material is skipped with a
/// warning. Transport failures abort the whole listing, and so does a history
/// with no readable version at all.
pub(crate) fn readable_versions<'a, I>(
    provider: &str,
    key_id: &str,
    fetched: I,
) -> Result<Vec<DataKey>, KeyVaultError>
where
    I: IntoIterator<Item = (&'a str, Result<DataKey, KeyVaultError>)>,
{
    let mut keys = Vec::new();
    let mut last_error = None;
    for (version, result) in fetched {
        match result {
            Ok(key) => keys.push(key),
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    provider,
                    key_id,
                    version,
                    error = %e,
                    "skipping unreadable key version"
                );
                last_error = Some(e);
            }
        }
    }
    if keys.is_empty() {
        return Err(last_error.unwrap_or_else(|| KeyVaultError::not_found(key_id)));
    }
    Ok(keys)
}

/// Resolve the configured backend into a concrete provider.
pub fn provider_from_config(config: &VaultConfig) -> Result<Arc<dyn KeyProvider>, KeyVaultError> {
    let provider: Arc<dyn KeyProvider> = match config.provider {
        KeyProviderKind::LocalDev => Arc::new(crate::local::LocalDevProvider::new(config.mode)?),
        KeyProviderKind::VendorA => {
            let settings = config.azure.clone().ok_or_else(|| {
                KeyVaultError::Misconfigured("PHIVAULT_AZURE_VAULT_URL is not set".into())
            })?;
            Arc::new(crate::azure::AzureKeyVaultProvider::new(
                settings,
                config.request_timeout,
            )?)
        }
        KeyProviderKind::VendorB => {
            let settings = config.aws.clone().ok_or_else(|| {
                KeyVaultError::Misconfigured(
                    "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set".into(),
                )
            })?;
            Arc::new(crate::aws::AwsSecretsProvider::new(
                settings,
                config.request_timeout,
            )?)
        }
    };
    tracing::info!(provider = provider.name(), "key provider initialized");
    Ok(provider)
}
