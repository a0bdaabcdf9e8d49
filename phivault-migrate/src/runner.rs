//! Batch migration of plaintext columns into their encrypted counterparts.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use phivault::FieldEncryption;

use crate::backup::Backup;
use crate::error::{MigrationError, StoreError};
use crate::registry::{FieldMapping, ModelRegistry, ModelSpec};
use crate::store::RecordStore;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// Options and per-record state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Report what would be encrypted; write nothing.
    pub dry_run: bool,
    /// Re-encrypt targets that already hold a valid envelope.
    pub force: bool,
    pub batch_size: usize,
    /// At most this many records per model.
    pub limit: Option<usize>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            batch_size: DEFAULT_BATCH_SIZE,
            limit: None,
        }
    }
}

/// Lifecycle of one record: `Unencrypted -> Encrypting -> {Encrypted | Skipped | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Unencrypted,
    Encrypting,
    Encrypted,
    Skipped,
    Error,
}

impl RecordState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Encrypted | Self::Skipped | Self::Error)
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// `processed == encrypted + skipped + errors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub encrypted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl BatchStats {
    fn record(&mut self, state: RecordState) {
        debug_assert!(state.is_terminal());
        self.processed += 1;
        match state {
            RecordState::Encrypted => self.encrypted += 1,
            RecordState::Skipped => self.skipped += 1,
            _ => self.errors += 1,
        }
    }

    fn absorb(&mut self, other: BatchStats) {
        self.processed += other.processed;
        self.encrypted += other.encrypted;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// A record that could not be migrated. Never carries field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub model: String,
    pub pk: String,
    pub field: Option<String>,
    pub reason: String,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} {}.{}: {}", self.model, self.pk, field, self.reason),
            None => write!(f, "{} {}: {}", self.model, self.pk, self.reason),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReport {
    pub model: String,
    /// Records selected (after `limit`).
    pub total: usize,
    pub batches: usize,
    pub stats: BatchStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub models: Vec<ModelReport>,
    pub totals: BatchStats,
    pub failures: Vec<RecordFailure>,
    /// Dry run only: `"Model pk.field"` for every value that would be encrypted.
    pub planned: Vec<String>,
    pub cancelled: bool,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        self.totals.errors == 0
    }

    /// Share of processed records that were encrypted, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.totals.processed == 0 {
            return 0.0;
        }
        self.totals.encrypted as f64 * 100.0 / self.totals.processed as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// The target column does not hold an envelope this key set can open.
    Undecryptable { reason: String },
    /// The envelope opens but differs from the plaintext column.
    ValueMismatch,
}

/// Names model, record and column only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationIssue {
    pub model: String,
    pub pk: String,
    pub field: String,
    pub kind: IssueKind,
}

impl fmt::Display for VerificationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IssueKind::Undecryptable { reason } => write!(
                f,
                "decryption failed for {} {}.{}: {}",
                self.model, self.pk, self.field, reason
            ),
            IssueKind::ValueMismatch => write!(
                f,
                "mismatch in {} {}.{}: decrypted value differs from source",
                self.model, self.pk, self.field
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    /// Target values that decrypted.
    pub verified: usize,
    pub issues: Vec<VerificationIssue>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct MigrationRunner {
    encryption: FieldEncryption,
    registry: ModelRegistry,
    options: MigrationOptions,
    cancel: Arc<AtomicBool>,
}

/// Outcome of one record, before it is folded into the batch counters.
struct RecordOutcome {
    state: RecordState,
    failure: Option<RecordFailure>,
    planned: Vec<String>,
}

impl MigrationRunner {
    pub fn new(
        encryption: FieldEncryption,
        registry: ModelRegistry,
        options: MigrationOptions,
    ) -> Self {
        Self {
            encryption,
            registry,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a cancellation flag. Checked between batches.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn encryption(&self) -> &FieldEncryption {
        &self.encryption
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Encrypted snapshot of all configured source columns.
    pub fn backup<S: RecordStore + ?Sized>(
        &self,
        path: &Path,
        store: &S,
    ) -> Result<Backup, MigrationError> {
        Backup::write(path, store, &self.registry, self.encryption.cipher())
    }

    pub fn run_all<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
    ) -> Result<MigrationReport, MigrationError> {
        let names: Vec<String> = self
            .registry
            .model_names()
            .into_iter()
            .map(String::from)
            .collect();
        self.run(store, &names)
    }

    /// Migrate `models` in order. Unknown names fail before anything is touched.
    pub fn run<S, M>(&self, store: &mut S, models: &[M]) -> Result<MigrationReport, MigrationError>
    where
        S: RecordStore + ?Sized,
        M: AsRef<str>,
    {
        let specs = models
            .iter()
            .map(|m| self.registry.require(m.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = MigrationReport {
            dry_run: self.options.dry_run,
            ..MigrationReport::default()
        };
        for spec in specs {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let model_report = self.migrate_model(store, spec, &mut report)?;
            report.totals.absorb(model_report.stats);
            report.models.push(model_report);
        }

        tracing::info!(
            processed = report.totals.processed,
            encrypted = report.totals.encrypted,
            skipped = report.totals.skipped,
            errors = report.totals.errors,
            cancelled = report.cancelled,
            dry_run = report.dry_run,
            "migration finished"
        );
        Ok(report)
    }

    fn migrate_model<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        spec: &ModelSpec,
        report: &mut MigrationReport,
    ) -> Result<ModelReport, MigrationError> {
        let ids = store.record_ids(&spec.name, self.options.limit)?;
        let mut model_report = ModelReport {
            model: spec.name.clone(),
            total: ids.len(),
            ..ModelReport::default()
        };
        tracing::info!(model = %spec.name, records = ids.len(), "processing model");

        for (batch_no, batch) in ids.chunks(self.options.batch_size.max(1)).enumerate() {
            if self.is_cancelled() {
                report.cancelled = true;
                tracing::warn!(model = %spec.name, batch = batch_no, "migration cancelled");
                break;
            }

            let mut stats = BatchStats::default();
            for pk in batch {
                let outcome = self.migrate_record(store, spec, pk);
                stats.record(outcome.state);
                report.planned.extend(outcome.planned);
                if let Some(failure) = outcome.failure {
                    tracing::warn!(
                        model = %failure.model,
                        pk = %failure.pk,
                        field = failure.field.as_deref().unwrap_or(""),
                        reason = %failure.reason,
                        "record not migrated"
                    );
                    report.failures.push(failure);
                }
            }
            if !self.options.dry_run {
                store.flush()?;
            }

            model_report.batches += 1;
            model_report.stats.absorb(stats);
            tracing::info!(
                model = %spec.name,
                batch = batch_no,
                processed = model_report.stats.processed,
                total = model_report.total,
                "progress"
            );
        }
        Ok(model_report)
    }

    fn migrate_record<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        spec: &ModelSpec,
        pk: &str,
    ) -> RecordOutcome {
        let mut outcome = RecordOutcome {
            state: RecordState::Unencrypted,
            failure: None,
            planned: Vec::new(),
        };
        let fail = |field: Option<&str>, reason: String| RecordFailure {
            model: spec.name.clone(),
            pk: pk.to_string(),
            field: field.map(String::from),
            reason,
        };

        outcome.state = RecordState::Encrypting;
        // Encrypt every pending field first; stage nothing unless all succeed.
        let mut writes: Vec<(String, String)> = Vec::new();
        for mapping in &spec.fields {
            match self.seal_field(&*store, &spec.name, pk, mapping) {
                Ok(None) => {}
                Ok(Some(mut field_writes)) => {
                    if self.options.dry_run {
                        outcome.planned.push(format!("{} {}.{}", spec.name, pk, mapping.source));
                    }
                    writes.append(&mut field_writes);
                }
                Err(reason) => {
                    outcome.state = RecordState::Error;
                    outcome.failure = Some(fail(Some(&mapping.source), reason));
                    return outcome;
                }
            }
        }

        if writes.is_empty() && outcome.planned.is_empty() {
            outcome.state = RecordState::Skipped;
            return outcome;
        }
        if self.options.dry_run {
            outcome.state = RecordState::Encrypted;
            return outcome;
        }

        let committed = writes
            .into_iter()
            .try_for_each(|(field, value)| store.set_field(&spec.name, pk, &field, value))
            .and_then(|()| store.save(&spec.name, pk));
        match committed {
            Ok(()) => outcome.state = RecordState::Encrypted,
            Err(e) => {
                outcome.state = RecordState::Error;
                outcome.failure = Some(fail(None, e.to_string()));
            }
        }
        outcome
    }

    /// Column writes for one mapping, `None` if there is nothing to do.
    /// In dry-run mode the writes carry no ciphertext.
    fn seal_field<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        model: &str,
        pk: &str,
        mapping: &FieldMapping,
    ) -> Result<Option<Vec<(String, String)>>, String> {
        // Dual-column setups may not have the target column yet.
        if !store.has_field(model, &mapping.target) {
            return Ok(None);
        }
        let source = read(store, model, pk, &mapping.source).map_err(|e| e.to_string())?;
        let Some(source) = source.filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        if !self.options.force {
            let target = read(store, model, pk, &mapping.target).map_err(|e| e.to_string())?;
            if target.is_some_and(|t| self.encryption.is_encrypted(&t)) {
                return Ok(None);
            }
        }

        if self.options.dry_run {
            return Ok(Some(Vec::new()));
        }

        let sealed = self
            .encryption
            .encrypt(&source, None)
            .map_err(|e| e.to_string())?;
        let mut writes = vec![(mapping.target.clone(), sealed)];
        let hash_column = mapping.hash_column();
        if store.has_field(model, &hash_column) {
            writes.push((hash_column, self.encryption.generate_search_hash(&source, None)));
        }
        Ok(Some(writes))
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    /// Check every non-empty target column of `model` (or of every model).
    pub fn verify<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        model: Option<&str>,
    ) -> Result<VerificationReport, MigrationError> {
        let specs: Vec<&ModelSpec> = match model {
            Some(name) => vec![self.registry.require(name)?],
            None => self.registry.models().iter().collect(),
        };

        let mut report = VerificationReport::default();
        for spec in specs {
            tracing::info!(model = %spec.name, "verifying model");
            for pk in store.record_ids(&spec.name, self.options.limit)? {
                for mapping in &spec.fields {
                    if !store.has_field(&spec.name, &mapping.target) {
                        continue;
                    }
                    let Some(target) = store
                        .get_field(&spec.name, &pk, &mapping.target)?
                        .filter(|t| !t.is_empty())
                    else {
                        continue;
                    };

                    let issue = |kind| VerificationIssue {
                        model: spec.name.clone(),
                        pk: pk.clone(),
                        field: mapping.target.clone(),
                        kind,
                    };
                    match self.encryption.decrypt(&target) {
                        Err(e) => report.issues.push(issue(IssueKind::Undecryptable {
                            reason: e.to_string(),
                        })),
                        Ok(plaintext) => {
                            report.verified += 1;
                            let source = read(store, &spec.name, &pk, &mapping.source)?;
                            if source.is_some_and(|s| !s.is_empty() && s != plaintext) {
                                report.issues.push(issue(IssueKind::ValueMismatch));
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(
            verified = report.verified,
            issues = report.issues.len(),
            "verification finished"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Single-column encryption
    // -----------------------------------------------------------------------

    /// Encrypt a plaintext column into itself. Values that already decrypt
    /// are skipped; a `<field>_hash` column is filled when present.
    pub fn encrypt_in_place<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        model: &str,
        field: &str,
    ) -> Result<BatchStats, MigrationError> {
        if !store.has_field(model, field) {
            return Err(StoreError::UnknownField {
                model: model.to_string(),
                field: field.to_string(),
            }
            .into());
        }
        let hash_column = format!("{}_hash", field);
        let with_hash = store.has_field(model, &hash_column);

        let ids = store.record_ids(model, self.options.limit)?;
        let mut totals = BatchStats::default();
        for batch in ids.chunks(self.options.batch_size.max(1)) {
            if self.is_cancelled() {
                break;
            }
            for pk in batch {
                let hash = with_hash.then_some(hash_column.as_str());
                let state = self.encrypt_value_in_place(store, model, pk, field, hash);
                totals.record(state);
            }
            if !self.options.dry_run {
                store.flush()?;
            }
        }
        tracing::info!(
            model,
            field,
            encrypted = totals.encrypted,
            skipped = totals.skipped,
            errors = totals.errors,
            "column encrypted in place"
        );
        Ok(totals)
    }

    fn encrypt_value_in_place<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        model: &str,
        pk: &str,
        field: &str,
        hash_column: Option<&str>,
    ) -> RecordState {
        let value = match store.get_field(model, pk, field) {
            Ok(Some(v)) if !v.is_empty() => v,
            Ok(_) => return RecordState::Skipped,
            Err(e) => {
                tracing::warn!(model, pk, field, error = %e, "record not readable");
                return RecordState::Error;
            }
        };
        if self.encryption.is_encrypted(&value) {
            return RecordState::Skipped;
        }
        if self.options.dry_run {
            return RecordState::Encrypted;
        }

        let sealed = match self.encryption.encrypt(&value, None) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!(model, pk, field, error = %e, "value not encrypted");
                return RecordState::Error;
            }
        };
        let hash = hash_column.map(|_| self.encryption.generate_search_hash(&value, None));
        let result = store
            .set_field(model, pk, field, sealed)
            .and_then(|()| match (hash_column, hash) {
                (Some(column), Some(hash)) => store.set_field(model, pk, column, hash),
                _ => Ok(()),
            })
            .and_then(|()| store.save(model, pk));
        match result {
            Ok(()) => RecordState::Encrypted,
            Err(e) => {
                tracing::warn!(model, pk, field, error = %e, "record not saved");
                RecordState::Error
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// `None` when the column does not exist.
fn read<S: RecordStore + ?Sized>(
    store: &S,
    model: &str,
    pk: &str,
    field: &str,
) -> Result<Option<String>, StoreError> {
    if !store.has_field(model, field) {
        return Ok(None);
    }
    store.get_field(model, pk, field)
}
