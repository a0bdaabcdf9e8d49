//! # phivault-migrate
//!
//! Moves existing plaintext PHI columns into encrypted columns, in batches,
//! without downtime: the plaintext column stays readable until a later
//! cleanup drops it.
//!
//! ```rust
//! use phivault::{CryptoSettings, FieldEncryption};
//! use phivault::keystore::VaultConfig;
//! use phivault_migrate::{InMemoryRecordStore, MigrationOptions, MigrationRunner, ModelRegistry};
//!
//! let mut store = InMemoryRecordStore::new();
//! store.insert_model("Trip", &["notes", "notes_encrypted"]);
//! store.insert_record("Trip", "t1", &[("notes", "ICU transfer")]).unwrap();
//!
//! let fields =
//!     FieldEncryption::from_config(&VaultConfig::development(), &CryptoSettings::default())
//!         .unwrap();
//! let runner =
//!     MigrationRunner::new(fields, ModelRegistry::phi_defaults(), MigrationOptions::default());
//! let report = runner.run(&mut store, &["Trip"]).unwrap();
//! assert_eq!(report.totals.encrypted, 1);
//! assert!(runner.verify(&store, None).unwrap().is_clean());
//! ```

pub mod backup;
pub mod cli;
pub mod error;
pub mod registry;
pub mod runner;
pub mod store;

pub use backup::{Backup, BackupRecord};
pub use error::{MigrationError, StoreError};
pub use registry::{FieldMapping, ModelRegistry, ModelSpec};
pub use runner::{
    BatchStats, IssueKind, MigrationOptions, MigrationReport, MigrationRunner, ModelReport,
    RecordFailure, RecordState, VerificationIssue, VerificationReport, DEFAULT_BATCH_SIZE,
};
pub use store::{
    find_by_search_hash, Dataset, InMemoryRecordStore, JsonFileRecordStore, ModelTable, Record,
    RecordStore,
};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use phivault::keystore::{KeyVaultManager, NullEventSink, VaultConfig};
    use phivault::{CryptoSettings, FieldEncryption};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const SALT: &str = "migration-test-salt";

    fn encryption() -> FieldEncryption {
        let keys = KeyVaultManager::from_config(&VaultConfig::development())
            .unwrap()
            .with_event_sink(Arc::new(NullEventSink));
        FieldEncryption::new(
            Arc::new(keys),
            &CryptoSettings {
                search_salt: Some(SALT.into()),
                ..CryptoSettings::default()
            },
        )
    }

    fn runner(options: MigrationOptions) -> MigrationRunner {
        MigrationRunner::new(encryption(), ModelRegistry::phi_defaults(), options)
    }

    /// Contacts with email (+hash column) and phone, and a Trip table whose
    /// target column does not exist yet.
    fn seeded() -> InMemoryRecordStore {
        let mut store = InMemoryRecordStore::new();
        store.insert_model(
            "Contact",
            &[
                "first_name",
                "email",
                "phone",
                "first_name_encrypted",
                "email_encrypted",
                "email_hash",
                "phone_encrypted",
            ],
        );
        store
            .insert_record(
                "Contact",
                "1",
                &[
                    ("first_name", "Jane"),
                    ("email", "Jane@Example.com"),
                    ("phone", "555-0100"),
                ],
            )
            .unwrap();
        store
            .insert_record("Contact", "2", &[("first_name", "John"), ("email", "john@example.com")])
            .unwrap();
        store.insert_record("Contact", "3", &[]).unwrap();

        store.insert_model("Trip", &["notes"]);
        store.insert_record("Trip", "t1", &[("notes", "ICU bed")]).unwrap();
        store
    }

    fn value(store: &InMemoryRecordStore, model: &str, pk: &str, field: &str) -> Option<String> {
        store.get_field(model, pk, field).unwrap()
    }

    // === Migration ===

    #[test]
    fn test_migrates_and_hashes() {
        let mut store = seeded();
        let runner = runner(MigrationOptions::default());
        let report = runner.run(&mut store, &["Contact"]).unwrap();

        assert_eq!(report.totals.processed, 3);
        assert_eq!(report.totals.encrypted, 2);
        assert_eq!(report.totals.skipped, 1);
        assert_eq!(report.totals.errors, 0);
        assert!(report.is_success());

        let fe = runner.encryption();
        let sealed = value(&store, "Contact", "1", "email_encrypted").unwrap();
        assert_eq!(fe.decrypt(&sealed).unwrap(), "Jane@Example.com");
        assert_eq!(
            value(&store, "Contact", "1", "email_hash").unwrap(),
            fe.generate_search_hash("jane@example.com", None)
        );
        assert!(value(&store, "Contact", "2", "phone_encrypted").is_none());
        // Source columns are left in place.
        assert_eq!(value(&store, "Contact", "1", "email").as_deref(), Some("Jane@Example.com"));
    }

    #[test]
    fn test_counters_add_up() {
        let mut store = seeded();
        let report = runner(MigrationOptions::default()).run_all(&mut store).unwrap();
        let t = report.totals;
        assert_eq!(t.processed, t.encrypted + t.skipped + t.errors);
        assert_eq!(report.models.len(), 8);
        let trip = report.models.iter().find(|m| m.model == "Trip").unwrap();
        // No notes_encrypted column: nothing to do.
        assert_eq!(trip.stats.skipped, 1);
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let mut store = seeded();
        let runner = runner(MigrationOptions::default());
        runner.run(&mut store, &["Contact"]).unwrap();
        let before = store.dataset().clone();

        let report = runner.run(&mut store, &["Contact"]).unwrap();
        assert_eq!(report.totals.encrypted, 0);
        assert_eq!(report.totals.skipped, report.totals.processed);
        assert_eq!(store.dataset(), &before);
    }

    #[test]
    fn test_force_reencrypts() {
        let mut store = seeded();
        runner(MigrationOptions::default()).run(&mut store, &["Contact"]).unwrap();
        let first = value(&store, "Contact", "1", "email_encrypted").unwrap();

        let forced = runner(MigrationOptions {
            force: true,
            ..MigrationOptions::default()
        });
        let report = forced.run(&mut store, &["Contact"]).unwrap();
        assert_eq!(report.totals.encrypted, 2);
        let second = value(&store, "Contact", "1", "email_encrypted").unwrap();
        assert_ne!(first, second);
        assert_eq!(forced.encryption().decrypt(&second).unwrap(), "Jane@Example.com");
    }

    #[test]
    fn test_garbage_target_gets_encrypted() {
        let mut store = seeded();
        store.set_field("Contact", "2", "email_encrypted", "legacy-plaintext".into()).unwrap();
        store.save("Contact", "2").unwrap();

        let report = runner(MigrationOptions::default()).run(&mut store, &["Contact"]).unwrap();
        assert_eq!(report.totals.encrypted, 2);
        assert_ne!(
            value(&store, "Contact", "2", "email_encrypted").as_deref(),
            Some("legacy-plaintext")
        );
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let mut store = seeded();
        let before = store.dataset().clone();
        let report = runner(MigrationOptions {
            dry_run: true,
            ..MigrationOptions::default()
        })
        .run(&mut store, &["Contact"])
        .unwrap();

        assert_eq!(store.dataset(), &before);
        assert_eq!(store.saves(), 0);
        assert_eq!(store.flushes(), 0);
        assert!(report.dry_run);
        assert_eq!(report.totals.encrypted, 2);
        assert_eq!(
            report.planned,
            vec![
                "Contact 1.first_name",
                "Contact 1.email",
                "Contact 1.phone",
                "Contact 2.first_name",
                "Contact 2.email",
            ]
        );
    }

    #[test]
    fn test_batches_and_limit() {
        let mut store = seeded();
        let report = runner(MigrationOptions {
            batch_size: 2,
            ..MigrationOptions::default()
        })
        .run(&mut store, &["Contact"])
        .unwrap();
        assert_eq!(report.models[0].batches, 2);
        assert_eq!(store.flushes(), 2);

        let mut store = seeded();
        let report = runner(MigrationOptions {
            limit: Some(1),
            ..MigrationOptions::default()
        })
        .run(&mut store, &["Contact"])
        .unwrap();
        assert_eq!(report.totals.processed, 1);
        assert!(value(&store, "Contact", "2", "email_encrypted").is_none());
    }

    #[test]
    fn test_unknown_model_fails_before_work() {
        let mut store = seeded();
        let err = runner(MigrationOptions::default())
            .run(&mut store, &["Contact", "Invoice"])
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnknownModel { .. }));
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn test_cancelled_run() {
        let mut store = seeded();
        let runner = runner(MigrationOptions::default());
        runner.cancel_flag().store(true, Ordering::Relaxed);
        let report = runner.run_all(&mut store).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.totals.processed, 0);
    }

    // === Verification ===

    #[test]
    fn test_verify_clean_after_migration() {
        let mut store = seeded();
        let runner = runner(MigrationOptions::default());
        runner.run_all(&mut store).unwrap();
        let report = runner.verify(&store, None).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.verified, 5);
    }

    #[test]
    fn test_verify_reports_each_issue_without_values() {
        let mut store = seeded();
        let runner = runner(MigrationOptions::default());
        runner.run_all(&mut store).unwrap();

        // One undecryptable value.
        let mut sealed = value(&store, "Contact", "1", "phone_encrypted").unwrap();
        sealed.insert(4, 'x');
        store.set_field("Contact", "1", "phone_encrypted", sealed).unwrap();
        // One mismatch: valid envelope for a different value.
        let other = runner.encryption().encrypt("someone-else@example.com", None).unwrap();
        store.set_field("Contact", "2", "email_encrypted", other).unwrap();

        let report = runner.verify(&store, Some("Contact")).unwrap();
        assert_eq!(report.issues.len(), 2);
        assert!(matches!(report.issues[0].kind, IssueKind::Undecryptable { .. }));
        assert_eq!(report.issues[0].field, "phone_encrypted");
        assert_eq!(report.issues[1].kind, IssueKind::ValueMismatch);
        for issue in &report.issues {
            let text = issue.to_string();
            assert!(!text.contains("555-0100"));
            assert!(!text.contains("example.com"));
        }
    }

    #[test]
    fn test_verify_unknown_model() {
        let store = seeded();
        assert!(runner(MigrationOptions::default()).verify(&store, Some("Invoice")).is_err());
    }

    // === Single column ===

    #[test]
    fn test_encrypt_in_place() {
        let mut store = InMemoryRecordStore::new();
        store.insert_model("Trip", &["notes", "notes_hash"]);
        store.insert_record("Trip", "t1", &[("notes", "ICU bed")]).unwrap();
        store.insert_record("Trip", "t2", &[]).unwrap();

        let runner = runner(MigrationOptions::default());
        let stats = runner.encrypt_in_place(&mut store, "Trip", "notes").unwrap();
        assert_eq!(stats.encrypted, 1);
        assert_eq!(stats.skipped, 1);

        let sealed = value(&store, "Trip", "t1", "notes").unwrap();
        assert_eq!(runner.encryption().decrypt(&sealed).unwrap(), "ICU bed");
        assert!(value(&store, "Trip", "t1", "notes_hash").is_some());

        let again = runner.encrypt_in_place(&mut store, "Trip", "notes").unwrap();
        assert_eq!(again.encrypted, 0);
        assert_eq!(again.skipped, 2);

        assert!(runner.encrypt_in_place(&mut store, "Trip", "missing").is_err());
    }

    // === Search ===

    #[test]
    fn test_find_migrated_record_by_hash() {
        let mut store = seeded();
        let runner = runner(MigrationOptions::default());
        runner.run(&mut store, &["Contact"]).unwrap();
        let hits = find_by_search_hash(
            &store,
            runner.encryption().hasher(),
            "Contact",
            "email_hash",
            "JOHN@EXAMPLE.COM",
        )
        .unwrap();
        assert_eq!(hits, vec!["2"]);
    }

    // === Backup ===

    #[test]
    fn test_backup_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        let store = seeded();
        let runner = runner(MigrationOptions::default());

        let written = runner.backup(&path, &store).unwrap();
        assert_eq!(written.record_count(), 3);

        let read = Backup::read(&path).unwrap();
        assert_eq!(read, written);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("Jane"));

        let values = read.decrypt_values(runner.encryption().cipher()).unwrap();
        assert_eq!(values["Contact"]["1"]["email"], "Jane@Example.com");
        assert_eq!(values["Contact"]["2"].len(), 2);
        assert!(!values["Contact"].contains_key("3"));
        assert_eq!(values["Trip"]["t1"]["notes"], "ICU bed");
    }

    #[test]
    fn test_store_save_failure_is_record_error() {
        struct ReadOnly(InMemoryRecordStore);

        impl RecordStore for ReadOnly {
            fn record_ids(
                &self,
                model: &str,
                limit: Option<usize>,
            ) -> Result<Vec<String>, StoreError> {
                self.0.record_ids(model, limit)
            }
            fn has_field(&self, model: &str, field: &str) -> bool {
                self.0.has_field(model, field)
            }
            fn get_field(
                &self,
                model: &str,
                pk: &str,
                field: &str,
            ) -> Result<Option<String>, StoreError> {
                self.0.get_field(model, pk, field)
            }
            fn set_field(
                &mut self,
                model: &str,
                pk: &str,
                field: &str,
                value: String,
            ) -> Result<(), StoreError> {
                self.0.set_field(model, pk, field, value)
            }
            fn save(&mut self, _: &str, _: &str) -> Result<(), StoreError> {
                Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )))
            }
            fn flush(&mut self) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let mut store = ReadOnly(seeded());
        let report = runner(MigrationOptions::default()).run(&mut store, &["Contact"]).unwrap();
        assert_eq!(report.totals.errors, 2);
        assert_eq!(report.totals.skipped, 1);
        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].to_string().starts_with("Contact 1: "));
    }
}
