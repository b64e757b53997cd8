//! Per-source diagnostics counters.
//!
//! [`SourceMetrics`] is updated by the [`Sensor`](crate::Sensor) that owns
//! the source and may be read concurrently from any thread through a shared
//! [`Arc`]. [`SourceMetrics::snapshot`] produces a serializable copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const NO_TIMESTAMP: i64 = i64::MIN;

/// Thread-safe counters for one source.
#[derive(Debug)]
pub struct SourceMetrics {
    reads_submitted: AtomicU64,
    reads_rejected: AtomicU64,
    reads_completed: AtomicU64,
    read_errors: AtomicU64,
    reads_skipped: AtomicU64,
    notifications: AtomicU64,
    subscribe_failures: AtomicU64,
    link_losses: AtomicU64,
    values_emitted: AtomicU64,
    unavailable_emitted: AtomicU64,
    /// Unix time of the last emitted value, in milliseconds.
    last_value_ms: AtomicI64,
}

impl Default for SourceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            reads_submitted: AtomicU64::new(0),
            reads_rejected: AtomicU64::new(0),
            reads_completed: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            reads_skipped: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            subscribe_failures: AtomicU64::new(0),
            link_losses: AtomicU64::new(0),
            values_emitted: AtomicU64::new(0),
            unavailable_emitted: AtomicU64::new(0),
            last_value_ms: AtomicI64::new(NO_TIMESTAMP),
        }
    }

    /// Create zeroed counters behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// A read was accepted by the transport.
    pub fn record_read_submitted(&self) {
        self.reads_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A read was refused at submission.
    pub fn record_read_rejected(&self) {
        self.reads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A read of the source's handle completed successfully.
    pub fn record_read_completed(&self) {
        self.reads_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// A read of the source's handle completed with an error status.
    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A poll was suppressed because a read was outstanding.
    pub fn record_read_skipped(&self) {
        self.reads_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A notification for the source's handle arrived.
    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    /// A subscribe request was refused at submission.
    pub fn record_subscribe_failure(&self) {
        self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// The link dropped.
    pub fn record_link_lost(&self) {
        self.link_losses.fetch_add(1, Ordering::Relaxed);
    }

    /// A measurement was published.
    pub fn record_emit(&self, available: bool) {
        if available {
            self.values_emitted.fetch_add(1, Ordering::Relaxed);
            let now_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
            self.last_value_ms.store(now_ms, Ordering::Relaxed);
        } else {
            self.unavailable_emitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let last = self.last_value_ms.load(Ordering::Relaxed);
        let last_value_at = if last == NO_TIMESTAMP {
            None
        } else {
            OffsetDateTime::from_unix_timestamp_nanos(last as i128 * 1_000_000).ok()
        };
        MetricsSnapshot {
            reads_submitted: self.reads_submitted.load(Ordering::Relaxed),
            reads_rejected: self.reads_rejected.load(Ordering::Relaxed),
            reads_completed: self.reads_completed.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            reads_skipped: self.reads_skipped.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            subscribe_failures: self.subscribe_failures.load(Ordering::Relaxed),
            link_losses: self.link_losses.load(Ordering::Relaxed),
            values_emitted: self.values_emitted.load(Ordering::Relaxed),
            unavailable_emitted: self.unavailable_emitted.load(Ordering::Relaxed),
            last_value_at,
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.reads_submitted,
            &self.reads_rejected,
            &self.reads_completed,
            &self.read_errors,
            &self.reads_skipped,
            &self.notifications,
            &self.subscribe_failures,
            &self.link_losses,
            &self.values_emitted,
            &self.unavailable_emitted,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.last_value_ms.store(NO_TIMESTAMP, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`SourceMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Reads accepted by the transport.
    pub reads_submitted: u64,
    /// Reads refused at submission.
    pub reads_rejected: u64,
    /// Successful reads of the source's handle.
    pub reads_completed: u64,
    /// Reads of the source's handle that completed with an error status.
    pub read_errors: u64,
    /// Polls suppressed by the in-flight guard.
    pub reads_skipped: u64,
    /// Notifications received for the source's handle.
    pub notifications: u64,
    /// Subscribe requests refused at submission.
    pub subscribe_failures: u64,
    /// Link losses observed.
    pub link_losses: u64,
    /// Measurements published with a value.
    pub values_emitted: u64,
    /// Unavailable markers published.
    pub unavailable_emitted: u64,
    /// When the last value was published.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_value_at: Option<OffsetDateTime>,
}

impl MetricsSnapshot {
    /// Fraction of submitted reads that completed successfully.
    pub fn read_success_rate(&self) -> Option<f64> {
        if self.reads_submitted == 0 {
            None
        } else {
            Some(self.reads_completed as f64 / self.reads_submitted as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = SourceMetrics::new();
        metrics.record_read_submitted();
        metrics.record_read_submitted();
        metrics.record_read_completed();
        metrics.record_read_error();
        metrics.record_link_lost();

        let snap = metrics.snapshot();
        assert_eq!(snap.reads_submitted, 2);
        assert_eq!(snap.reads_completed, 1);
        assert_eq!(snap.read_errors, 1);
        assert_eq!(snap.link_losses, 1);
        assert_eq!(snap.read_success_rate(), Some(0.5));
    }

    #[test]
    fn test_emit_stamps_last_value() {
        let metrics = SourceMetrics::new();
        assert!(metrics.snapshot().last_value_at.is_none());

        metrics.record_emit(false);
        assert!(metrics.snapshot().last_value_at.is_none());
        assert_eq!(metrics.snapshot().unavailable_emitted, 1);

        metrics.record_emit(true);
        let snap = metrics.snapshot();
        assert_eq!(snap.values_emitted, 1);
        assert!(snap.last_value_at.is_some());
    }

    #[test]
    fn test_reset() {
        let metrics = SourceMetrics::new();
        metrics.record_notification();
        metrics.record_emit(true);
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serialization() {
        let metrics = SourceMetrics::new();
        metrics.record_read_skipped();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"reads_skipped\":1"));
        assert!(json.contains("\"last_value_at\":null"));
    }
}
