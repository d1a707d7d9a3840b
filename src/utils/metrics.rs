//! Observability and Metrics
//!
//! This module provides metrics collection for monitoring codec throughput
//! and the rate of refused or failed objects.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for codec operations
#[derive(Debug)]
pub struct Metrics {
    /// Top-level values decoded
    pub values_decoded: AtomicU64,
    /// Top-level values encoded
    pub values_encoded: AtomicU64,
    /// Objects constructed by the reader
    pub objects_constructed: AtomicU64,
    /// Objects refused by the security gate
    pub objects_denied: AtomicU64,
    /// Objects discarded after an object-level failure
    pub objects_failed: AtomicU64,
    /// Errors that closed a reader
    pub fatal_errors: AtomicU64,
    /// Bytes claimed from allocation budgets
    pub budget_bytes_claimed: AtomicU64,
    /// RESET tokens processed or emitted
    pub resets: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            values_decoded: AtomicU64::new(0),
            values_encoded: AtomicU64::new(0),
            objects_constructed: AtomicU64::new(0),
            objects_denied: AtomicU64::new(0),
            objects_failed: AtomicU64::new(0),
            fatal_errors: AtomicU64::new(0),
            budget_bytes_claimed: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a decoded top-level value
    pub fn value_decoded(&self) {
        self.values_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an encoded top-level value
    pub fn value_encoded(&self) {
        self.values_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_constructed(&self) {
        self.objects_constructed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_denied(&self) {
        self.objects_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_failed(&self) {
        self.objects_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stream closed by a fatal error
    pub fn fatal_error(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn budget_claimed(&self, bytes: u64) {
        self.budget_bytes_claimed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            values_decoded: self.values_decoded.load(Ordering::Relaxed),
            values_encoded: self.values_encoded.load(Ordering::Relaxed),
            objects_constructed: self.objects_constructed.load(Ordering::Relaxed),
            objects_denied: self.objects_denied.load(Ordering::Relaxed),
            objects_failed: self.objects_failed.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
            budget_bytes_claimed: self.budget_bytes_claimed.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            values_decoded = snapshot.values_decoded,
            values_encoded = snapshot.values_encoded,
            objects_constructed = snapshot.objects_constructed,
            objects_denied = snapshot.objects_denied,
            objects_failed = snapshot.objects_failed,
            fatal_errors = snapshot.fatal_errors,
            budget_bytes_claimed = snapshot.budget_bytes_claimed,
            resets = snapshot.resets,
            uptime_seconds = snapshot.uptime_seconds,
            "Codec metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub values_decoded: u64,
    pub values_encoded: u64,
    pub objects_constructed: u64,
    pub objects_denied: u64,
    pub objects_failed: u64,
    pub fatal_errors: u64,
    pub budget_bytes_claimed: u64,
    pub resets: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.value_decoded();
        metrics.object_denied();
        metrics.object_denied();
        metrics.budget_claimed(128);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.values_decoded, 1);
        assert_eq!(snapshot.objects_denied, 2);
        assert_eq!(snapshot.budget_bytes_claimed, 128);
        assert_eq!(snapshot.fatal_errors, 0);
        metrics.log_metrics();
    }

    #[test]
    fn test_global_is_shared() {
        let before = global_metrics().snapshot().resets;
        global_metrics().reset();
        assert!(global_metrics().snapshot().resets > before);
    }
}
