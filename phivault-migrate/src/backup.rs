//! Encrypted snapshot of source values, taken before a migration.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use phivault::{EncryptionError, EnvelopeCipher};
use serde::{Deserialize, Serialize};

use crate::error::MigrationError;
use crate::registry::ModelRegistry;
use crate::store::RecordStore;

/// One backed-up record: primary key plus encrypted source columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub pk: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

/// ```text
/// {"created_at": "...", "models": {"Contact": [{"pk": "1", "email": "<envelope>"}]}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub created_at: DateTime<Utc>,
    pub models: BTreeMap<String, Vec<BackupRecord>>,
}

impl Backup {
    /// Snapshot every non-empty source column of every model in `registry`.
    /// Records with nothing to back up are left out.
    pub fn capture<S: RecordStore + ?Sized>(
        store: &S,
        registry: &ModelRegistry,
        cipher: &EnvelopeCipher,
    ) -> Result<Self, MigrationError> {
        let mut models = BTreeMap::new();
        for model in registry.models() {
            let mut records = Vec::new();
            for pk in store.record_ids(&model.name, None)? {
                let mut fields = BTreeMap::new();
                for mapping in &model.fields {
                    if !store.has_field(&model.name, &mapping.source) {
                        continue;
                    }
                    let Some(value) = store.get_field(&model.name, &pk, &mapping.source)? else {
                        continue;
                    };
                    if value.is_empty() {
                        continue;
                    }
                    let sealed = cipher
                        .encrypt(&value, None)
                        .map_err(MigrationError::BackupEncryption)?;
                    fields.insert(mapping.source.clone(), sealed);
                }
                if !fields.is_empty() {
                    records.push(BackupRecord { pk, fields });
                }
            }
            tracing::debug!(model = %model.name, records = records.len(), "model backed up");
            models.insert(model.name.clone(), records);
        }
        Ok(Self {
            created_at: Utc::now(),
            models,
        })
    }

    /// Capture and write to `path` in one step.
    pub fn write<S: RecordStore + ?Sized>(
        path: &Path,
        store: &S,
        registry: &ModelRegistry,
        cipher: &EnvelopeCipher,
    ) -> Result<Self, MigrationError> {
        let backup = Self::capture(store, registry, cipher)?;
        backup.save(path)?;
        tracing::info!(
            path = %path.display(),
            records = backup.record_count(),
            "backup created"
        );
        Ok(backup)
    }

    pub fn save(&self, path: &Path) -> Result<(), MigrationError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| {
            MigrationError::BackupFormat {
                path: path.to_path_buf(),
                source,
            }
        })?;
        std::fs::write(path, json).map_err(|source| MigrationError::BackupIo {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, MigrationError> {
        let json = std::fs::read_to_string(path).map_err(|source| MigrationError::BackupIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| MigrationError::BackupFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn record_count(&self) -> usize {
        self.models.values().map(Vec::len).sum()
    }

    /// Plaintext of every backed-up value: model -> pk -> column -> value.
    pub fn decrypt_values(
        &self,
        cipher: &EnvelopeCipher,
    ) -> Result<BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>, EncryptionError> {
        let mut out = BTreeMap::new();
        for (model, records) in &self.models {
            let mut by_pk = BTreeMap::new();
            for record in records {
                let mut fields = BTreeMap::new();
                for (column, sealed) in &record.fields {
                    fields.insert(column.clone(), cipher.decrypt(sealed)?);
                }
                by_pk.insert(record.pk.clone(), fields);
            }
            out.insert(model.clone(), by_pk);
        }
        Ok(out)
    }
}
