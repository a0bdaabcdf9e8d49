//! Record stores: where the rows being migrated live.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use phivault::SearchHasher;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Row access for the migration runner.
///
/// `set_field` stages a value on one record, `save` commits that record's
/// staged values, `flush` makes committed state durable. Reads see staged
/// values, like attributes on a loaded ORM object.
pub trait RecordStore {
    /// Primary keys of `model` in storage order. A model the store has no
    /// table for has no records.
    fn record_ids(&self, model: &str, limit: Option<usize>) -> Result<Vec<String>, StoreError>;

    fn has_field(&self, model: &str, field: &str) -> bool;

    fn get_field(&self, model: &str, pk: &str, field: &str) -> Result<Option<String>, StoreError>;

    fn set_field(&mut self, model: &str, pk: &str, field: &str, value: String)
        -> Result<(), StoreError>;

    fn save(&mut self, model: &str, pk: &str) -> Result<(), StoreError>;

    fn flush(&mut self) -> Result<(), StoreError>;
}

/// Primary keys of `model` whose `hash_field` equals the search token of
/// `value`. Equality only.
pub fn find_by_search_hash<S: RecordStore + ?Sized>(
    store: &S,
    hasher: &SearchHasher,
    model: &str,
    hash_field: &str,
    value: &str,
) -> Result<Vec<String>, StoreError> {
    if value.is_empty() || !store.has_field(model, hash_field) {
        return Ok(Vec::new());
    }
    let mut hits = Vec::new();
    for pk in store.record_ids(model, None)? {
        if let Some(token) = store.get_field(model, &pk, hash_field)? {
            if hasher.matches(value, &token) {
                hits.push(pk);
            }
        }
    }
    Ok(hits)
}

// ---------------------------------------------------------------------------
// Data layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub pk: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTable {
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

/// `{ "models": { "<Model>": { "columns": [..], "records": [..] } } }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub models: BTreeMap<String, ModelTable>,
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Store over an in-memory [`Dataset`] (tests and embedding).
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    data: Dataset,
    staged: HashMap<(String, String), BTreeMap<String, String>>,
    saves: usize,
    flushes: usize,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(data: Dataset) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Add (or replace) a table.
    pub fn insert_model(&mut self, model: &str, columns: &[&str]) {
        self.data.models.insert(
            model.to_string(),
            ModelTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                records: Vec::new(),
            },
        );
    }

    /// Append a committed record. Unlisted columns are null.
    pub fn insert_record(
        &mut self,
        model: &str,
        pk: &str,
        values: &[(&str, &str)],
    ) -> Result<(), StoreError> {
        let table = self.table_mut(model)?;
        let mut fields: BTreeMap<String, Option<String>> =
            table.columns.iter().map(|c| (c.clone(), None)).collect();
        for (column, value) in values {
            if !table.columns.iter().any(|c| c == column) {
                return Err(StoreError::UnknownField {
                    model: model.to_string(),
                    field: column.to_string(),
                });
            }
            fields.insert(column.to_string(), Some(value.to_string()));
        }
        table.records.push(Record {
            pk: pk.to_string(),
            fields,
        });
        Ok(())
    }

    pub fn dataset(&self) -> &Dataset {
        &self.data
    }

    pub fn into_dataset(self) -> Dataset {
        self.data
    }

    /// Number of `save` calls so far.
    pub fn saves(&self) -> usize {
        self.saves
    }

    /// Number of `flush` calls so far.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    fn table(&self, model: &str) -> Result<&ModelTable, StoreError> {
        self.data
            .models
            .get(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
    }

    fn table_mut(&mut self, model: &str) -> Result<&mut ModelTable, StoreError> {
        self.data
            .models
            .get_mut(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
    }

    fn record(&self, model: &str, pk: &str) -> Result<&Record, StoreError> {
        self.table(model)?
            .records
            .iter()
            .find(|r| r.pk == pk)
            .ok_or_else(|| StoreError::UnknownRecord {
                model: model.to_string(),
                pk: pk.to_string(),
            })
    }

    fn check_field(&self, model: &str, field: &str) -> Result<(), StoreError> {
        if self.has_field(model, field) {
            Ok(())
        } else {
            Err(StoreError::UnknownField {
                model: model.to_string(),
                field: field.to_string(),
            })
        }
    }
}

impl RecordStore for InMemoryRecordStore {
    fn record_ids(&self, model: &str, limit: Option<usize>) -> Result<Vec<String>, StoreError> {
        let Some(table) = self.data.models.get(model) else {
            return Ok(Vec::new());
        };
        let limit = limit.unwrap_or(usize::MAX);
        Ok(table.records.iter().take(limit).map(|r| r.pk.clone()).collect())
    }

    fn has_field(&self, model: &str, field: &str) -> bool {
        self.data
            .models
            .get(model)
            .map_or(false, |t| t.columns.iter().any(|c| c == field))
    }

    fn get_field(&self, model: &str, pk: &str, field: &str) -> Result<Option<String>, StoreError> {
        let record = self.record(model, pk)?;
        self.check_field(model, field)?;
        let key = (model.to_string(), pk.to_string());
        if let Some(value) = self.staged.get(&key).and_then(|s| s.get(field)) {
            return Ok(Some(value.clone()));
        }
        Ok(record.fields.get(field).cloned().flatten())
    }

    fn set_field(
        &mut self,
        model: &str,
        pk: &str,
        field: &str,
        value: String,
    ) -> Result<(), StoreError> {
        self.record(model, pk)?;
        self.check_field(model, field)?;
        self.staged
            .entry((model.to_string(), pk.to_string()))
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    fn save(&mut self, model: &str, pk: &str) -> Result<(), StoreError> {
        let staged = self
            .staged
            .remove(&(model.to_string(), pk.to_string()))
            .unwrap_or_default();
        let table = self.table_mut(model)?;
        let record = table
            .records
            .iter_mut()
            .find(|r| r.pk == pk)
            .ok_or_else(|| StoreError::UnknownRecord {
                model: model.to_string(),
                pk: pk.to_string(),
            })?;
        for (field, value) in staged {
            record.fields.insert(field, Some(value));
        }
        self.saves += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.flushes += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// A [`Dataset`] loaded from and flushed back to one JSON file.
#[derive(Debug)]
pub struct JsonFileRecordStore {
    path: PathBuf,
    inner: InMemoryRecordStore,
    dirty: bool,
}

impl JsonFileRecordStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let json = std::fs::read_to_string(&path)?;
        let data: Dataset = serde_json::from_str(&json)?;
        Ok(Self {
            path,
            inner: InMemoryRecordStore::from_dataset(data),
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dataset(&self) -> &Dataset {
        self.inner.dataset()
    }
}

impl RecordStore for JsonFileRecordStore {
    fn record_ids(&self, model: &str, limit: Option<usize>) -> Result<Vec<String>, StoreError> {
        self.inner.record_ids(model, limit)
    }

    fn has_field(&self, model: &str, field: &str) -> bool {
        self.inner.has_field(model, field)
    }

    fn get_field(&self, model: &str, pk: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.inner.get_field(model, pk, field)
    }

    fn set_field(
        &mut self,
        model: &str,
        pk: &str,
        field: &str,
        value: String,
    ) -> Result<(), StoreError> {
        self.inner.set_field(model, pk, field, value)
    }

    fn save(&mut self, model: &str, pk: &str) -> Result<(), StoreError> {
        self.inner.save(model, pk)?;
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(self.inner.dataset())?;
        // Atomic write: write to temp, then rename
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), "record store flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contacts() -> InMemoryRecordStore {
        let mut store = InMemoryRecordStore::new();
        store.insert_model("Contact", &["email", "email_encrypted", "email_hash"]);
        store.insert_record("Contact", "1", &[("email", "a@example.com")]).unwrap();
        store.insert_record("Contact", "2", &[("email", "b@example.com")]).unwrap();
        store
    }

    #[test]
    fn staged_values_commit_on_save() {
        let mut store = contacts();
        store.set_field("Contact", "1", "email_encrypted", "ct".into()).unwrap();
        assert_eq!(
            store.get_field("Contact", "1", "email_encrypted").unwrap().as_deref(),
            Some("ct")
        );
        assert_eq!(store.dataset().models["Contact"].records[0].fields["email_encrypted"], None);

        store.save("Contact", "1").unwrap();
        assert_eq!(
            store.dataset().models["Contact"].records[0].fields["email_encrypted"].as_deref(),
            Some("ct")
        );
    }

    #[test]
    fn unknown_things_are_errors() {
        let mut store = contacts();
        assert!(matches!(
            store.get_field("Invoice", "1", "email"),
            Err(StoreError::UnknownModel(_))
        ));
        assert!(matches!(
            store.get_field("Contact", "9", "email"),
            Err(StoreError::UnknownRecord { .. })
        ));
        assert!(matches!(
            store.set_field("Contact", "1", "ssn", "x".into()),
            Err(StoreError::UnknownField { .. })
        ));
        assert!(store.record_ids("Invoice", None).unwrap().is_empty());
    }

    #[test]
    fn limit_applies_in_order() {
        let store = contacts();
        assert_eq!(store.record_ids("Contact", Some(1)).unwrap(), vec!["1"]);
        assert_eq!(store.record_ids("Contact", None).unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn search_by_hash() {
        let hasher = SearchHasher::new(Some("salt".into()));
        let mut store = contacts();
        let token = hasher.generate_search_hash("b@example.com", None);
        store.set_field("Contact", "2", "email_hash", token).unwrap();
        store.save("Contact", "2").unwrap();

        let find = |column: &str, value: &str| {
            find_by_search_hash(&store, &hasher, "Contact", column, value).unwrap()
        };
        assert_eq!(find("email_hash", "B@Example.com"), vec!["2"]);
        assert!(find("email_hash", "").is_empty());
        assert!(find("phone_hash", "x").is_empty());
    }

    #[test]
    fn json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{"models":{"Trip":{"columns":["notes","notes_encrypted"],
                "records":[{"pk":"t1","notes":"ICU bed","notes_encrypted":null}]}}}"#,
        )
        .unwrap();

        let mut store = JsonFileRecordStore::open(&path).unwrap();
        assert_eq!(store.get_field("Trip", "t1", "notes").unwrap().as_deref(), Some("ICU bed"));
        store.set_field("Trip", "t1", "notes_encrypted", "ct".into()).unwrap();
        store.save("Trip", "t1").unwrap();
        store.flush().unwrap();
        assert!(!path.with_extension("tmp").exists());

        let reopened = JsonFileRecordStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_field("Trip", "t1", "notes_encrypted").unwrap().as_deref(),
            Some("ct")
        );
    }
}
