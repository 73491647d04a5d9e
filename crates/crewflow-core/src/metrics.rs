//! Process-wide atomic counters for crewflow.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the pipeline does this when a run finishes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    tasks_dispatched: AtomicU64,
    retries: AtomicU64,
    agents_spawned: AtomicU64,
    tasks_rejected: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tasks_dispatched: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            agents_spawned: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
        }
    }

    pub fn inc_dispatched(&self) {
        self.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tasks_dispatched", "counter incremented");
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    pub fn inc_spawned(&self) {
        self.agents_spawned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "agents_spawned", "counter incremented");
    }

    /// Tasks the recruiter refused for budget.
    pub fn inc_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tasks_rejected", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            tasks_dispatched = self.tasks_dispatched(),
            retries = self.retries(),
            agents_spawned = self.agents_spawned(),
            tasks_rejected = self.tasks_rejected(),
        );
    }

    pub fn tasks_dispatched(&self) -> u64 {
        self.tasks_dispatched.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn agents_spawned(&self) -> u64 {
        self.agents_spawned.load(Ordering::Relaxed)
    }

    pub fn tasks_rejected(&self) -> u64 {
        self.tasks_rejected.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.tasks_dispatched.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.agents_spawned.store(0, Ordering::Relaxed);
        self.tasks_rejected.store(0, Ordering::Relaxed);
    }
}
