//! Query and health statistics tracking.
//!
//! Thread-safe counters written by the executor and the health monitor and
//! read by the status server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use strum::IntoEnumIterator;

use super::types::{ErrorKind, FailureRecord};

/// Thread-safe statistics tracker.
///
/// Failed attempts are counted per [`ErrorKind`] using atomic counters, so the
/// tracker can be shared across tasks with `Arc`. All kinds are initialized to
/// zero on creation.
pub struct QueryStats {
    failures: HashMap<ErrorKind, AtomicUsize>,
    executions: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    slow_queries: AtomicU64,
    latency_micros: AtomicU64,
    probes_failed: AtomicU64,
    resets_succeeded: AtomicU64,
    resets_failed: AtomicU64,
}

impl QueryStats {
    pub fn new() -> Self {
        let mut failures = HashMap::new();
        for kind in ErrorKind::iter() {
            failures.insert(kind, AtomicUsize::new(0));
        }

        QueryStats {
            failures,
            executions: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            latency_micros: AtomicU64::new(0),
            probes_failed: AtomicU64::new(0),
            resets_succeeded: AtomicU64::new(0),
            resets_failed: AtomicU64::new(0),
        }
    }

    /// Records one failed attempt.
    pub fn record_failure(&self, record: &FailureRecord) {
        if let Some(counter) = self.failures.get(&record.kind) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!(
                "Attempted to increment failure counter for {:?} which is not in the map",
                record.kind
            );
        }
    }

    /// Records the start of one `execute` call.
    pub fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow_query(&self) {
        self.slow_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe_failure(&self) {
        self.probes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset(&self, succeeded: bool) {
        if succeeded {
            self.resets_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.resets_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Failed attempts of one kind. Returns 0 for kinds missing from the map.
    pub fn failure_count(&self, kind: ErrorKind) -> usize {
        self.failures
            .get(&kind)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn total_failures(&self) -> usize {
        self.failures.values().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn slow_queries(&self) -> u64 {
        self.slow_queries.load(Ordering::SeqCst)
    }

    pub fn probes_failed(&self) -> u64 {
        self.probes_failed.load(Ordering::SeqCst)
    }

    pub fn resets_succeeded(&self) -> u64 {
        self.resets_succeeded.load(Ordering::SeqCst)
    }

    pub fn resets_failed(&self) -> u64 {
        self.resets_failed.load(Ordering::SeqCst)
    }

    /// Mean latency of successful executions in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        let successes = self.successes();
        if successes == 0 {
            return 0.0;
        }
        self.latency_micros.load(Ordering::SeqCst) as f64 / successes as f64 / 1000.0
    }
}

impl Default for QueryStats {
    fn default() -> Self {
        Self::new()
    }
}
