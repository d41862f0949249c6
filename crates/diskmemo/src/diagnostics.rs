//! Structured diagnostics emitted by the cache
//!
//! Non-fatal conditions (skipped instances, eviction shortfalls, rollbacks)
//! are reported as [`CacheEvent`]s to a [`Diagnostics`] sink owned by the
//! [`crate::DiskCache`]. The default sink forwards to `tracing`.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// A non-fatal event worth surfacing to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A candidate's descriptor record could not be read during lookup.
    LookupSkipped {
        /// Instance id
        instance: String,
        /// Why the record was rejected
        reason: String,
    },
    /// A last-usage marker exists but could not be parsed.
    UsageMarkerUnreadable {
        /// Instance id
        instance: String,
        /// Parse or read failure
        reason: String,
    },
    /// An instance was removed to satisfy the configured limits.
    Evicted {
        /// Instance id
        instance: String,
    },
    /// Removing an eviction candidate failed; it was skipped.
    EvictionFailed {
        /// Instance id
        instance: String,
        /// Removal failure
        reason: String,
    },
    /// Limits are still exceeded after removing every evictable instance.
    EvictionShortfall {
        /// Instances left in the root
        instance_count: usize,
        /// Bytes left in the root
        total_size_bytes: u64,
        /// Configured size ceiling
        max_total_size_bytes: Option<u64>,
        /// Configured count ceiling
        max_instance_count: Option<usize>,
    },
    /// A pending instance was removed after its computation failed.
    RolledBack {
        /// Instance id
        instance: String,
        /// The failure that triggered the rollback
        reason: String,
    },
    /// An uncommitted leftover directory was deleted.
    OrphanSwept {
        /// Instance id
        instance: String,
    },
}

impl CacheEvent {
    /// Whether the event indicates something the user should look at.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::LookupSkipped { .. }
                | Self::UsageMarkerUnreadable { .. }
                | Self::EvictionFailed { .. }
                | Self::EvictionShortfall { .. }
        )
    }
}

/// Receives cache events.
pub trait Diagnostics: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: CacheEvent);
}

/// Forwards events to `tracing`: warnings at WARN, the rest at INFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn emit(&self, event: CacheEvent) {
        match &event {
            CacheEvent::LookupSkipped { instance, reason } => tracing::warn!(
                instance = %instance,
                "While parsing cache instance, an unexpected error occurred. Skipping cache instance: {reason}"
            ),
            CacheEvent::UsageMarkerUnreadable { instance, reason } => tracing::warn!(
                instance = %instance,
                "Last-usage marker could not be parsed, falling back to modification time: {reason}"
            ),
            CacheEvent::Evicted { instance } => {
                tracing::info!(instance = %instance, "Evicted cache instance");
            }
            CacheEvent::EvictionFailed { instance, reason } => tracing::warn!(
                instance = %instance,
                "Failed to evict cache instance: {reason}"
            ),
            CacheEvent::EvictionShortfall {
                instance_count,
                total_size_bytes,
                max_total_size_bytes,
                max_instance_count,
            } => tracing::warn!(
                instance_count,
                total_size_bytes,
                ?max_total_size_bytes,
                ?max_instance_count,
                "Removed all cache instances besides the one just created, yet the cache root is \
                 still larger than allowed. Is the size limit configured too restrictively?"
            ),
            CacheEvent::RolledBack { instance, reason } => tracing::info!(
                instance = %instance,
                "Generation of cache instance was aborted. Removed intermediate results: {reason}"
            ),
            CacheEvent::OrphanSwept { instance } => {
                tracing::info!(instance = %instance, "Removed uncommitted cache instance");
            }
        }
    }
}

/// Keeps every event in memory, for inspection after a call.
#[derive(Debug, Default)]
pub struct CollectedDiagnostics {
    events: Mutex<Vec<CacheEvent>>,
}

impl CollectedDiagnostics {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far
    #[must_use]
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the warning events
    #[must_use]
    pub fn warnings(&self) -> Vec<CacheEvent> {
        self.events()
            .into_iter()
            .filter(CacheEvent::is_warning)
            .collect()
    }
}

impl Diagnostics for CollectedDiagnostics {
    fn emit(&self, event: CacheEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
