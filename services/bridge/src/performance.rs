//! C7: Performance Registry — counters, gauges, timers, and latency
//! histograms across the bridge, exported as one serializable snapshot.
//!
//! The original this is grounded on (`original_source/performance.h`) keeps
//! one global table and a `print_report` call; we keep the shape but drop
//! the global singleton in favor of a value threaded through [`crate::engine`].

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Fixed histogram buckets (milliseconds), matching the original's
/// coarse-grained latency buckets: under 1ms, under 10ms, under 100ms, under
/// 1s, and everything slower.
const HISTOGRAM_BUCKETS_MS: [u64; 4] = [1, 10, 100, 1000];

#[derive(Debug, Default)]
struct Timer {
    count: u64,
    total_ms: u64,
    min_ms: u64,
    max_ms: u64,
    buckets: [u64; 5],
}

impl Timer {
    fn record(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        self.count += 1;
        self.total_ms += ms;
        self.min_ms = if self.count == 1 { ms } else { self.min_ms.min(ms) };
        self.max_ms = self.max_ms.max(ms);
        let bucket = HISTOGRAM_BUCKETS_MS
            .iter()
            .position(|&b| ms < b)
            .unwrap_or(HISTOGRAM_BUCKETS_MS.len());
        self.buckets[bucket] += 1;
    }
}

#[derive(Debug, Default)]
struct Registry {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, i64>,
    timers: HashMap<String, Timer>,
}

/// Single lock guarding every counter/gauge/timer update (§5).
pub struct PerformanceRegistry {
    inner: Mutex<Registry>,
}

impl Default for PerformanceRegistry {
    fn default() -> Self {
        PerformanceRegistry {
            inner: Mutex::new(Registry::default()),
        }
    }
}

impl PerformanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, amount: u64) {
        *self
            .inner
            .lock()
            .unwrap()
            .counters
            .entry(name.to_owned())
            .or_insert(0) += amount;
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        self.inner
            .lock()
            .unwrap()
            .gauges
            .insert(name.to_owned(), value);
    }

    pub fn record_timer(&self, name: &str, elapsed: Duration) {
        self.inner
            .lock()
            .unwrap()
            .timers
            .entry(name.to_owned())
            .or_default()
            .record(elapsed);
    }

    /// Run `f`, recording its wall-clock duration under `name`, and return
    /// its result. Used to wrap a C1-C6 call site without an explicit
    /// start/stop pair at every call.
    pub fn time<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = std::time::Instant::now();
        let result = f();
        self.record_timer(name, start.elapsed());
        result
    }

    #[must_use]
    pub fn snapshot(&self) -> PerformanceReport {
        let inner = self.inner.lock().unwrap();
        PerformanceReport {
            counters: inner.counters.clone(),
            gauges: inner.gauges.clone(),
            timers: inner
                .timers
                .iter()
                .map(|(name, t)| {
                    (
                        name.clone(),
                        TimerReport {
                            count: t.count,
                            avg_ms: if t.count == 0 {
                                0.0
                            } else {
                                t.total_ms as f64 / t.count as f64
                            },
                            min_ms: t.min_ms,
                            max_ms: t.max_ms,
                            buckets: t.buckets,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerReport {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    /// Counts for `< 1ms, < 10ms, < 100ms, < 1s, >= 1s`.
    pub buckets: [u64; 5],
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, i64>,
    pub timers: HashMap<String, TimerReport>,
}

// Counter/timer names used from C1-C6 entry/exit points (§B), collected
// here so call sites share one vocabulary instead of ad hoc string literals.
pub mod names {
    pub const CACHE_HIT: &str = "cache.hit";
    pub const CACHE_MISS: &str = "cache.miss";
    pub const ADAPTER_CALL: &str = "downlink.call_ms";
    pub const DISPATCH_GET: &str = "dispatch.get_ms";
    pub const DISPATCH_SET: &str = "dispatch.set_ms";
    pub const TRANSACTION: &str = "webconfig.transaction_ms";
}
