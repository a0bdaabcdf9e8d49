//! Key events: every fetch, rotation and health probe emits a structured event.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Key events
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAction {
    /// Key fetched from the provider and cached.
    Fetched,
    /// Served from the cache.
    CacheHit,
    /// Rotation interval elapsed; key still served.
    RotationDue,
    /// New version issued by the provider.
    Rotated { version: String },
    /// Historical versions fetched for decryption fallback.
    HistoryFetched { versions: usize },
    /// Cached material dropped.
    Invalidated,
    /// Vault probed with `list_keys`.
    HealthChecked { key_count: Option<usize> },
}

/// A structured key event. Never carries key material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyEvent {
    pub timestamp: DateTime<Utc>,
    /// Absent for vault-wide events (health checks).
    pub key_id: Option<String>,
    pub action: KeyAction,
    /// Provider name (`development`, `azure`, `aws`).
    pub provider: String,
    pub success: bool,
    pub detail: Option<String>,
}

impl KeyEvent {
    pub fn key_event(
        timestamp: DateTime<Utc>,
        key_id: &str,
        provider: &str,
        action: KeyAction,
    ) -> Self {
        Self {
            timestamp,
            key_id: Some(key_id.to_string()),
            action,
            provider: provider.to_string(),
            success: true,
            detail: None,
        }
    }

    pub fn vault_event(timestamp: DateTime<Utc>, provider: &str, action: KeyAction) -> Self {
        Self {
            timestamp,
            key_id: None,
            action,
            provider: provider.to_string(),
            success: true,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.success = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// Where key events go. Implement this for your SIEM/log system.
pub trait KeyEventSink: Send + Sync {
    fn record(&self, event: KeyEvent);
}

// ---------------------------------------------------------------------------
// Built-in sinks
// ---------------------------------------------------------------------------

/// Logs events via the `tracing` crate.
pub struct TracingEventSink;

impl KeyEventSink for TracingEventSink {
    fn record(&self, event: KeyEvent) {
        match &event.action {
            KeyAction::CacheHit => tracing::trace!(
                key_id = ?event.key_id,
                provider = %event.provider,
                "key cache hit"
            ),
            KeyAction::RotationDue => tracing::debug!(
                key_id = ?event.key_id,
                provider = %event.provider,
                "key rotation due"
            ),
            action => tracing::info!(
                key_id = ?event.key_id,
                action = ?action,
                provider = %event.provider,
                success = event.success,
                detail = ?event.detail,
                "key event"
            ),
        }
    }
}

/// Discards everything.
pub struct NullEventSink;

impl KeyEventSink for NullEventSink {
    fn record(&self, _event: KeyEvent) {}
}

/// Collects events in memory (for tests and the admin tool).
#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<KeyEvent>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<KeyEvent> {
        self.events.lock().clone()
    }

    pub fn events_for_key(&self, key_id: &str) -> Vec<KeyEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.key_id.as_deref() == Some(key_id))
            .cloned()
            .collect()
    }

    pub fn count(&self, action: &KeyAction) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.action == action)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl KeyEventSink for InMemoryEventSink {
    fn record(&self, event: KeyEvent) {
        self.events.lock().push(event);
    }
}
