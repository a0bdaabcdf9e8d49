//! Key cache: TTL caching, serialized vault fetches and rotation tracking.

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheSettings, VaultConfig};
use crate::error::{KeyCacheError, KeyRotationRequired, KeyVaultError};
use crate::events::{KeyAction, KeyEvent, KeyEventSink, TracingEventSink};
use crate::provider::{provider_from_config, KeyProvider};
use crate::types::{DataKey, HealthReport, HealthStatus, KeyUsage};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Cache entries
// ---------------------------------------------------------------------------

struct CachedKey {
    key: DataKey,
    fetched_at: DateTime<Utc>,
}

struct CachedHistory {
    keys: Vec<DataKey>,
    fetched_at: DateTime<Utc>,
}

/// Per-key usage metadata. Lives for the process; not subject to the TTL.
#[derive(Clone, Debug, Default)]
struct UsageRecord {
    last_access: Option<DateTime<Utc>>,
    last_rotation: Option<DateTime<Utc>>,
    version: Option<String>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns the resolved provider and fronts it with a TTL cache.
///
/// Share one instance per process behind an `Arc`. Reads take a read lock on
/// the cache map; fetches and rotations are serialized by a single mutex so
/// concurrent misses for the same key hit the vault once.
pub struct KeyVaultManager {
    provider: Arc<dyn KeyProvider>,
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    events: Arc<dyn KeyEventSink>,
    keys: RwLock<HashMap<String, Arc<CachedKey>>>,
    history: RwLock<HashMap<String, Arc<CachedHistory>>>,
    usage: RwLock<HashMap<String, UsageRecord>>,
    fetch_lock: Mutex<()>,
}

impl KeyVaultManager {
    pub fn new(
        provider: Arc<dyn KeyProvider>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            settings,
            clock,
            events: Arc::new(TracingEventSink),
            keys: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            usage: RwLock::new(HashMap::new()),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Resolve the configured provider and wrap it with the configured cache.
    pub fn from_config(config: &VaultConfig) -> Result<Self, KeyVaultError> {
        let provider = provider_from_config(config)?;
        Ok(Self::new(provider, config.cache, Arc::new(SystemClock)))
    }

    pub fn with_event_sink(mut self, events: Arc<dyn KeyEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn provider(&self) -> &dyn KeyProvider {
        self.provider.as_ref()
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    // -----------------------------------------------------------------------
    // Key retrieval
    // -----------------------------------------------------------------------

    /// Current key for `key_id`.
    ///
    /// A cache hit whose rotation interval has elapsed (or that was never
    /// rotated) yields [`KeyCacheError::RotationRequired`], which still
    /// carries the key. A miss fetches from the provider under the fetch lock.
    pub fn get_encryption_key(&self, key_id: &str) -> Result<DataKey, KeyCacheError> {
        if let Some(entry) = self.cached(key_id) {
            self.emit(KeyEvent::key_event(
                self.clock.now(),
                key_id,
                self.provider.name(),
                KeyAction::CacheHit,
            ));
            if self.is_rotation_needed(key_id) {
                self.emit(KeyEvent::key_event(
                    self.clock.now(),
                    key_id,
                    self.provider.name(),
                    KeyAction::RotationDue,
                ));
                return Err(KeyRotationRequired::new(key_id, entry.key.clone()).into());
            }
            return Ok(entry.key.clone());
        }

        let _guard = self.fetch_lock.lock();

        // Another caller may have populated the entry while we waited.
        if let Some(entry) = self.cached(key_id) {
            return Ok(entry.key.clone());
        }

        let key = match self.provider.get_key(key_id) {
            Ok(key) => key,
            Err(e) => {
                self.emit(
                    KeyEvent::key_event(
                        self.clock.now(),
                        key_id,
                        self.provider.name(),
                        KeyAction::Fetched,
                    )
                    .with_failure()
                    .with_detail(e.to_string()),
                );
                return Err(e.into());
            }
        };

        let now = self.clock.now();
        self.keys.write().insert(
            key_id.to_string(),
            Arc::new(CachedKey {
                key: key.clone(),
                fetched_at: now,
            }),
        );
        self.touch(key_id, now, key.version(), false);
        self.emit(KeyEvent::key_event(
            now,
            key_id,
            self.provider.name(),
            KeyAction::Fetched,
        ));
        Ok(key)
    }

    /// Every retrievable version of `key_id`, newest first. Cached with the
    /// same TTL as current keys; dropped on rotation.
    pub fn historical_keys(&self, key_id: &str) -> Result<Vec<DataKey>, KeyVaultError> {
        let now = self.clock.now();
        if let Some(entry) = self.history.read().get(key_id) {
            if self.fresh(entry.fetched_at, now) {
                return Ok(entry.keys.clone());
            }
        }

        let _guard = self.fetch_lock.lock();

        // Another caller may have loaded the history while we waited.
        let now = self.clock.now();
        if let Some(entry) = self.history.read().get(key_id) {
            if self.fresh(entry.fetched_at, now) {
                return Ok(entry.keys.clone());
            }
        }

        let keys = self.provider.key_versions(key_id)?;
        self.history.write().insert(
            key_id.to_string(),
            Arc::new(CachedHistory {
                keys: keys.clone(),
                fetched_at: now,
            }),
        );
        self.emit(KeyEvent::key_event(
            now,
            key_id,
            self.provider.name(),
            KeyAction::HistoryFetched {
                versions: keys.len(),
            },
        ));
        Ok(keys)
    }

    /// Drop cached material for `key_id`. Usage metadata is kept.
    pub fn invalidate(&self, key_id: &str) {
        let removed = self.keys.write().remove(key_id).is_some();
        let removed_history = self.history.write().remove(key_id).is_some();
        if removed || removed_history {
            self.emit(KeyEvent::key_event(
                self.clock.now(),
                key_id,
                self.provider.name(),
                KeyAction::Invalidated,
            ));
        }
    }

    // -----------------------------------------------------------------------
    // Rotation
    // -----------------------------------------------------------------------

    /// Issue a new key version and make it current in the cache.
    pub fn rotate_key(&self, key_id: &str) -> Result<bool, KeyVaultError> {
        let _guard = self.fetch_lock.lock();

        let (key, version) = match self.provider.rotate_key(key_id) {
            Ok(rotated) => rotated,
            Err(e) => {
                self.emit(
                    KeyEvent::key_event(
                        self.clock.now(),
                        key_id,
                        self.provider.name(),
                        KeyAction::Rotated {
                            version: String::new(),
                        },
                    )
                    .with_failure()
                    .with_detail(e.to_string()),
                );
                return Err(e);
            }
        };

        let now = self.clock.now();
        self.keys.write().insert(
            key_id.to_string(),
            Arc::new(CachedKey {
                key,
                fetched_at: now,
            }),
        );
        self.history.write().remove(key_id);
        self.touch(key_id, now, Some(&version), true);
        self.emit(KeyEvent::key_event(
            now,
            key_id,
            self.provider.name(),
            KeyAction::Rotated { version },
        ));
        Ok(true)
    }

    /// Due when no rotation was ever recorded, or when more than the
    /// rotation interval has passed since the last one.
    pub fn is_rotation_needed(&self, key_id: &str) -> bool {
        let last_rotation = self
            .usage
            .read()
            .get(key_id)
            .and_then(|u| u.last_rotation);
        match last_rotation {
            None => true,
            Some(at) => match (self.clock.now() - at).to_std() {
                Ok(elapsed) => elapsed > self.settings.rotation_interval,
                // Rotation recorded in the future: clock went backwards.
                Err(_) => false,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Health and audit
    // -----------------------------------------------------------------------

    /// Probe the vault with `list_keys`. Never fails; failures are reported.
    pub fn health_check(&self) -> HealthReport {
        let result = self.provider.list_keys();
        let timestamp = self.clock.now();
        let report = match result {
            Ok(keys) => HealthReport {
                status: HealthStatus::Healthy,
                vault_type: self.provider.name().to_string(),
                key_count: Some(keys.len()),
                error: None,
                timestamp,
            },
            Err(e) => HealthReport {
                status: HealthStatus::Unhealthy,
                vault_type: self.provider.name().to_string(),
                key_count: None,
                error: Some(e.to_string()),
                timestamp,
            },
        };

        let mut event = KeyEvent::vault_event(
            timestamp,
            self.provider.name(),
            KeyAction::HealthChecked {
                key_count: report.key_count,
            },
        );
        if let Some(error) = &report.error {
            event = event.with_failure().with_detail(error.clone());
        }
        self.emit(event);
        report
    }

    /// Local usage record for `key_id`. Does not contact the vault.
    pub fn audit_key_usage(&self, key_id: &str) -> KeyUsage {
        let usage = self.usage.read().get(key_id).cloned().unwrap_or_default();
        KeyUsage {
            key_id: key_id.to_string(),
            last_access: usage.last_access,
            last_rotation: usage.last_rotation,
            version: usage.version,
            rotation_needed: self.is_rotation_needed(key_id),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn cached(&self, key_id: &str) -> Option<Arc<CachedKey>> {
        let entry = self.keys.read().get(key_id).cloned()?;
        if self.fresh(entry.fetched_at, self.clock.now()) {
            Some(entry)
        } else {
            None
        }
    }

    fn fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - fetched_at).to_std() {
            Ok(age) => age < self.settings.ttl,
            Err(_) => true,
        }
    }

    fn touch(&self, key_id: &str, now: DateTime<Utc>, version: Option<&str>, rotated: bool) {
        let mut usage = self.usage.write();
        let record = usage.entry(key_id.to_string()).or_default();
        record.last_access = Some(now);
        if let Some(v) = version {
            record.version = Some(v.to_string());
        }
        if rotated {
            record.last_rotation = Some(now);
        }
    }

    fn emit(&self, event: KeyEvent) {
        self.events.record(event);
    }
}
