//! Observability infrastructure for the dispatch engine.
//!
//! Provides counters for submissions, outcomes and pool activity, plus a
//! timer for per-request durations. Log output goes through `tracing` when
//! the `tracing` feature is enabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Dispatch metrics collector.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Requests submitted through `perform_sync`.
    pub sync_submitted: AtomicU64,
    /// Requests submitted through `perform_async`.
    pub async_submitted: AtomicU64,
    /// Messages accepted by the server.
    pub emails_sent: AtomicU64,
    /// Requests that ended in an error, validation included.
    pub emails_failed: AtomicU64,
    /// Requests rejected before any network activity.
    pub validation_failures: AtomicU64,
    /// Connections opened by the pool.
    pub connections_opened: AtomicU64,
    /// Failed connection attempts.
    pub connections_failed: AtomicU64,
    /// Pool entries removed by idle sweeps.
    pub connections_evicted: AtomicU64,
    /// Idle sweeps performed.
    pub sweeps: AtomicU64,
    /// Batches drained by the worker.
    pub batches: AtomicU64,
}

impl DispatchMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records submitted requests.
    pub fn record_submitted(&self, count: usize, asynchronous: bool) {
        let counter = if asynchronous {
            &self.async_submitted
        } else {
            &self.sync_submitted
        };
        counter.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a successful email send.
    pub fn record_send_success(&self) {
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed request.
    pub fn record_send_failure(&self, validation: bool) {
        self.emails_failed.fetch_add(1, Ordering::Relaxed);
        if validation {
            self.validation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a connection attempt.
    pub fn record_connection_attempt(&self, success: bool) {
        if success {
            self.connections_opened.fetch_add(1, Ordering::Relaxed);
        } else {
            self.connections_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an idle sweep and how many entries it evicted.
    pub fn record_sweep(&self, evicted: usize) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.connections_evicted
            .fetch_add(evicted as u64, Ordering::Relaxed);
    }

    /// Records a drained batch.
    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sync_submitted: self.sync_submitted.load(Ordering::Relaxed),
            async_submitted: self.async_submitted.load(Ordering::Relaxed),
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            emails_failed: self.emails_failed.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            connections_evicted: self.connections_evicted.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        self.sync_submitted.store(0, Ordering::Relaxed);
        self.async_submitted.store(0, Ordering::Relaxed);
        self.emails_sent.store(0, Ordering::Relaxed);
        self.emails_failed.store(0, Ordering::Relaxed);
        self.validation_failures.store(0, Ordering::Relaxed);
        self.connections_opened.store(0, Ordering::Relaxed);
        self.connections_failed.store(0, Ordering::Relaxed);
        self.connections_evicted.store(0, Ordering::Relaxed);
        self.sweeps.store(0, Ordering::Relaxed);
        self.batches.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests submitted through `perform_sync`.
    pub sync_submitted: u64,
    /// Requests submitted through `perform_async`.
    pub async_submitted: u64,
    /// Messages accepted by the server.
    pub emails_sent: u64,
    /// Requests that ended in an error.
    pub emails_failed: u64,
    /// Requests rejected before any network activity.
    pub validation_failures: u64,
    /// Connections opened by the pool.
    pub connections_opened: u64,
    /// Failed connection attempts.
    pub connections_failed: u64,
    /// Pool entries removed by idle sweeps.
    pub connections_evicted: u64,
    /// Idle sweeps performed.
    pub sweeps: u64,
    /// Batches drained by the worker.
    pub batches: u64,
}

impl MetricsSnapshot {
    /// Returns the email success rate.
    pub fn success_rate(&self) -> f64 {
        let total = self.emails_sent + self.emails_failed;
        if total == 0 {
            1.0
        } else {
            self.emails_sent as f64 / total as f64
        }
    }

    /// Returns the number of requests that have completed either way.
    pub fn completed(&self) -> u64 {
        self.emails_sent + self.emails_failed
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            timer = %self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timer stopped"
        );

        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = DispatchMetrics::new();

        metrics.record_submitted(2, false);
        metrics.record_submitted(3, true);
        metrics.record_send_success();
        metrics.record_send_success();
        metrics.record_send_failure(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sync_submitted, 2);
        assert_eq!(snapshot.async_submitted, 3);
        assert_eq!(snapshot.emails_sent, 2);
        assert_eq!(snapshot.emails_failed, 1);
        assert_eq!(snapshot.validation_failures, 1);
        assert_eq!(snapshot.completed(), 3);
        assert!((snapshot.success_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_pool_metrics() {
        let metrics = DispatchMetrics::new();

        metrics.record_connection_attempt(true);
        metrics.record_connection_attempt(false);
        metrics.record_sweep(2);
        metrics.record_sweep(0);
        metrics.record_batch();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_opened, 1);
        assert_eq!(snapshot.connections_failed, 1);
        assert_eq!(snapshot.connections_evicted, 2);
        assert_eq!(snapshot.sweeps, 2);
        assert_eq!(snapshot.batches, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        std::thread::sleep(std::time::Duration::from_millis(10));
        let duration = timer.stop();
        assert!(duration >= std::time::Duration::from_millis(10));
    }
}
