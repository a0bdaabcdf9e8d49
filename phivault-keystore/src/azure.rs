//! Vendor A: Azure Key Vault, secrets REST API.
//!
//! Each key id is a secret whose value is the base64 of the 32-byte key.
//! Setting a secret creates a new version; old versions stay readable until
//! purged, which is what decryption of pre-rotation data relies on.

use crate::config::AzureSettings;
use crate::error::KeyVaultError;
use crate::http::{self, Reply};
use crate::provider::{readable_versions, KeyProvider};
use crate::types::{DataKey, KeyMetadata, KEY_SIZE};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const API_VERSION: &str = "7.4";

/// Upper bound on `nextLink` pages followed by one listing.
const MAX_PAGES: usize = 1000;

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
    id: String,
    #[serde(default)]
    attributes: SecretAttributes,
}

#[derive(Clone, Copy, Default, Deserialize)]
struct SecretAttributes {
    enabled: Option<bool>,
    created: Option<i64>,
    updated: Option<i64>,
    exp: Option<i64>,
}

#[derive(Deserialize)]
struct SecretItem {
    id: String,
    #[serde(default)]
    attributes: SecretAttributes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretListPage {
    #[serde(default)]
    value: Vec<SecretItem>,
    next_link: Option<String>,
}

/// `https://vault/secrets/{name}[/{version}]` → (name, version).
fn split_secret_id(id: &str) -> Option<(&str, Option<&str>)> {
    let rest = id.split("/secrets/").nth(1)?;
    let mut parts = rest.splitn(2, '/');
    let name = parts.next().filter(|n| !n.is_empty())?;
    let version = parts.next().filter(|v| !v.is_empty());
    Some((name, version))
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Secret names: 1-127 characters, ASCII alphanumerics and dashes.
fn check_secret_name(key_id: &str) -> Result<(), KeyVaultError> {
    let valid = !key_id.is_empty()
        && key_id.len() <= 127
        && key_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(KeyVaultError::Misconfigured(format!(
            "{:?} is not a valid Azure secret name",
            key_id
        )))
    }
}

pub struct AzureKeyVaultProvider {
    client: Client,
    vault_url: String,
    token: String,
}

impl AzureKeyVaultProvider {
    pub fn new(settings: AzureSettings, timeout: Duration) -> Result<Self, KeyVaultError> {
        let vault_url = settings.vault_url.trim_end_matches('/').to_string();
        if vault_url.is_empty() {
            return Err(KeyVaultError::Misconfigured(
                "PHIVAULT_AZURE_VAULT_URL is empty".into(),
            ));
        }
        if settings.token.is_empty() {
            return Err(KeyVaultError::Misconfigured(
                "PHIVAULT_AZURE_TOKEN is not set".into(),
            ));
        }
        Ok(Self {
            client: http::build_client(timeout)?,
            vault_url,
            token: settings.token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}?api-version={}", self.vault_url, path, API_VERSION)
    }

    fn get(&self, url: &str, key_id: Option<&str>) -> Result<Reply, KeyVaultError> {
        let reply = http::send(self.client.get(url).bearer_auth(&self.token))?;
        http::check_status(&reply, key_id)?;
        Ok(reply)
    }

    fn fetch_bundle(&self, key_id: &str, version: Option<&str>) -> Result<DataKey, KeyVaultError> {
        check_secret_name(key_id)?;
        let path = match version {
            Some(v) => format!("/secrets/{}/{}", key_id, v),
            None => format!("/secrets/{}", key_id),
        };
        let bundle: SecretBundle = self.get(&self.url(&path), Some(key_id))?.json()?;
        if bundle.attributes.enabled == Some(false) {
            return Err(KeyVaultError::InvalidResponse(format!(
                "secret {} version {} is disabled",
                key_id,
                version.unwrap_or("current")
            )));
        }
        let key = DataKey::from_base64(key_id, &bundle.value)?;
        Ok(match split_secret_id(&bundle.id).and_then(|(_, v)| v) {
            Some(v) => key.with_version(v),
            None => key,
        })
    }

    /// Store fresh material as a new secret version.
    fn set_secret(&self, key_id: &str) -> Result<(DataKey, String), KeyVaultError> {
        check_secret_name(key_id)?;
        let key = DataKey::generate();
        let body = serde_json::json!({
            "value": key.to_base64(),
            "contentType": "application/octet-stream;base64",
        });
        let reply = http::send(
            self.client
                .put(self.url(&format!("/secrets/{}", key_id)))
                .bearer_auth(&self.token)
                .json(&body),
        )?;
        http::check_status(&reply, Some(key_id))?;
        let bundle: SecretBundle = reply.json()?;
        let version = split_secret_id(&bundle.id)
            .and_then(|(_, v)| v)
            .ok_or_else(|| {
                KeyVaultError::InvalidResponse(format!("secret id {:?} has no version", bundle.id))
            })?
            .to_string();
        Ok((key.with_version(version.clone()), version))
    }

    /// Follow `nextLink` until the listing is exhausted.
    fn list_pages(&self, first: String) -> Result<Vec<SecretItem>, KeyVaultError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;
        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(KeyVaultError::InvalidResponse(
                    "secret listing did not terminate".into(),
                ));
            }
            let page: SecretListPage = self.get(&url, None)?.json()?;
            items.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }
        Ok(items)
    }
}

impl KeyProvider for AzureKeyVaultProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn get_key(&self, key_id: &str) -> Result<DataKey, KeyVaultError> {
        self.fetch_bundle(key_id, None)
    }

    fn create_key(&self, key_id: &str, size: usize) -> Result<DataKey, KeyVaultError> {
        if size != KEY_SIZE {
            return Err(KeyVaultError::InvalidKeySize {
                key_id: key_id.to_string(),
                actual: size,
                expected: KEY_SIZE,
            });
        }
        let (key, version) = self.set_secret(key_id)?;
        tracing::info!(key_id, version = %version, "created key in Azure Key Vault");
        Ok(key)
    }

    fn rotate_key(&self, key_id: &str) -> Result<(DataKey, String), KeyVaultError> {
        self.set_secret(key_id)
    }

    fn list_keys(&self) -> Result<BTreeMap<String, KeyMetadata>, KeyVaultError> {
        let mut keys = BTreeMap::new();
        for item in self.list_pages(self.url("/secrets"))? {
            let Some((name, version)) = split_secret_id(&item.id) else {
                continue;
            };
            let attrs = item.attributes;
            let mut extra = BTreeMap::new();
            if let Some(exp) = timestamp(attrs.exp) {
                extra.insert("expires".to_string(), exp.to_rfc3339());
            }
            keys.insert(
                name.to_string(),
                KeyMetadata {
                    created: timestamp(attrs.created),
                    updated: timestamp(attrs.updated),
                    version: version.map(str::to_string),
                    status: match attrs.enabled {
                        Some(false) => "disabled".into(),
                        _ => "enabled".into(),
                    },
                    extra,
                },
            );
        }
        Ok(keys)
    }

    fn key_versions(&self, key_id: &str) -> Result<Vec<DataKey>, KeyVaultError> {
        check_secret_name(key_id)?;
        let mut versions: Vec<(Option<i64>, String)> = self
            .list_pages(self.url(&format!("/secrets/{}/versions", key_id)))?
            .into_iter()
            .filter(|item| item.attributes.enabled != Some(false))
            .filter_map(|item| {
                let version = split_secret_id(&item.id)?.1?.to_string();
                Some((item.attributes.created, version))
            })
            .collect();
        if versions.is_empty() {
            return Err(KeyVaultError::not_found(key_id));
        }
        versions.sort_by(|a, b| b.0.cmp(&a.0));

        readable_versions(
            self.name(),
            key_id,
            versions.iter().map(|(_, version)| {
                let version = version.as_str();
                (version, self.fetch_bundle(key_id, Some(version)))
            }),
        )
    }
}
