//! Global atomic counters for pipeline activity.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit all values as one `tracing::info!` event,
//! typically when a binary exits.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    gate_denied: AtomicU64,
    cache_hits: AtomicU64,
    cache_fallbacks: AtomicU64,
    cache_misses: AtomicU64,
    publishes: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            gate_denied: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_fallbacks: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_runs_started(&self) {
        Self::bump(&self.runs_started, "runs_started");
    }

    /// Record a run's terminal outcome.
    pub fn inc_run_finished(&self, success: bool) {
        if success {
            Self::bump(&self.runs_succeeded, "runs_succeeded");
        } else {
            Self::bump(&self.runs_failed, "runs_failed");
        }
    }

    pub fn inc_gate_denied(&self) {
        Self::bump(&self.gate_denied, "gate_denied");
    }

    pub fn inc_cache_hit(&self) {
        Self::bump(&self.cache_hits, "cache_hits");
    }

    pub fn inc_cache_fallback(&self) {
        Self::bump(&self.cache_fallbacks, "cache_fallbacks");
    }

    pub fn inc_cache_miss(&self) {
        Self::bump(&self.cache_misses, "cache_misses");
    }

    pub fn inc_publishes(&self) {
        Self::bump(&self.publishes, "publishes");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_succeeded = self.runs_succeeded(),
            runs_failed = self.runs_failed(),
            gate_denied = self.gate_denied(),
            cache_hits = self.cache_hits(),
            cache_fallbacks = self.cache_fallbacks(),
            cache_misses = self.cache_misses(),
            publishes = self.publishes(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_succeeded(&self) -> u64 {
        self.runs_succeeded.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn gate_denied(&self) -> u64 {
        self.gate_denied.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_fallbacks(&self) -> u64 {
        self.cache_fallbacks.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn publishes(&self) -> u64 {
        self.publishes.load(Ordering::Relaxed)
    }
}
