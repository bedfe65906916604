use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::stats::delay::{
    bucket_index, DELAY_MARK_MS, INTERVAL_MARK_SECS, INTERVAL_NUM,
};
use crate::stats::window::WindowStats;

/// Sentinel op receiving every event additively to the per-command op.
pub const ALL_OPS: &str = "ALL";

/// RESP reply kind of a completed request. Only `Error` feeds the
/// redis-error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespType {
    Status,
    Error,
    Integer,
    Bulk,
    Array,
}

/// Lifetime totals plus five rolling windows for one command.
///
/// Created lazily on first event and never destroyed; holders keep their
/// `Arc` across resets.
pub struct OpStats {
    opstr: String,
    total_calls: AtomicI64,
    total_nsecs: AtomicI64,
    total_fails: AtomicI64,
    redis_errors: AtomicI64,

    // Unix-epoch nanoseconds, written by the slow-op controller. Atomic so
    // the controller never mutates plain fields under the read lock.
    last_set_slow_ns: AtomicI64,
    last_clear_slow_ns: AtomicI64,

    windows: [WindowStats; INTERVAL_NUM],
}

impl OpStats {
    pub fn new(opstr: &str) -> Self {
        Self {
            opstr: opstr.to_string(),
            total_calls: AtomicI64::new(0),
            total_nsecs: AtomicI64::new(0),
            total_fails: AtomicI64::new(0),
            redis_errors: AtomicI64::new(0),
            last_set_slow_ns: AtomicI64::new(0),
            last_clear_slow_ns: AtomicI64::new(0),
            windows: std::array::from_fn(|i| WindowStats::new(INTERVAL_MARK_SECS[i])),
        }
    }

    #[inline]
    pub fn opstr(&self) -> &str {
        &self.opstr
    }

    #[inline]
    pub fn window(&self, index: usize) -> &WindowStats {
        &self.windows[index]
    }

    /// Hot path: fold one response into the lifetime totals and all five
    /// windows. Atomics only; the bucket is computed once.
    pub fn incr(&self, duration_ns: i64, resp: RespType) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_nsecs.fetch_add(duration_ns, Ordering::Relaxed);
        if resp == RespType::Error {
            self.redis_errors.fetch_add(1, Ordering::Relaxed);
        }

        let bucket = bucket_index(duration_ns);
        for window in &self.windows {
            window.record(duration_ns, bucket);
        }

        self.incr_delay(duration_ns / 1_000_000);
    }

    /// Threshold classifier: ascending scan, stop at the first threshold
    /// the duration does not reach.
    fn incr_delay(&self, duration_ms: i64) {
        for (kind, &mark) in DELAY_MARK_MS.iter().enumerate() {
            if duration_ms < mark {
                break;
            }
            for window in &self.windows {
                window.incr_delay(kind);
            }
        }
    }

    #[inline]
    pub fn incr_fails(&self) {
        self.total_fails.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_window(&self, index: usize, elapsed: Duration) {
        debug_assert!(index < INTERVAL_NUM);
        self.windows[index].refresh(elapsed, &self.opstr);
    }

    /// Zero the lifetime totals. Windowed counters are left untouched.
    pub fn reset_totals(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.total_nsecs.store(0, Ordering::Relaxed);
        self.total_fails.store(0, Ordering::Relaxed);
        self.redis_errors.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn total_calls(&self) -> i64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total_nsecs(&self) -> i64 {
        self.total_nsecs.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total_fails(&self) -> i64 {
        self.total_fails.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn redis_errors(&self) -> i64 {
        self.redis_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn last_set_slow_ns(&self) -> i64 {
        self.last_set_slow_ns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_last_set_slow_ns(&self, now_ns: i64) {
        self.last_set_slow_ns.store(now_ns, Ordering::Relaxed);
    }

    #[inline]
    pub fn last_clear_slow_ns(&self) -> i64 {
        self.last_clear_slow_ns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_last_clear_slow_ns(&self, now_ns: i64) {
        self.last_clear_slow_ns.store(now_ns, Ordering::Relaxed);
    }

    /// Point-in-time copy of the lifetime totals and the derived fields of
    /// one window. Times in the record are microseconds; TP*/avg are
    /// milliseconds.
    pub fn snapshot(&self, index: usize) -> OpStatsSnapshot {
        let window = &self.windows[index];

        let mut snapshot = OpStatsSnapshot {
            opstr: self.opstr.clone(),
            interval: window.interval_secs(),
            total_calls: self.total_calls(),
            total_usecs: self.total_nsecs() / 1_000,
            usecs_percall: 0,
            calls: window.calls(),
            usecs: window.nsecs() / 1_000,
            fails: self.total_fails(),
            redis_errtype: self.redis_errors(),
            qps: window.qps(),
            avg: window.avg_ms(),
            tp90: window.tp90_ms(),
            tp99: window.tp99_ms(),
            tp999: window.tp999_ms(),
            tp9999: window.tp9999_ms(),
            tp100: window.tp100_ms(),
            delay50ms: window.delay(0),
            delay100ms: window.delay(1),
            delay200ms: window.delay(2),
            delay300ms: window.delay(3),
            delay500ms: window.delay(4),
            delay1s: window.delay(5),
            delay2s: window.delay(6),
            delay3s: window.delay(7),
        };
        if snapshot.calls != 0 {
            snapshot.usecs_percall = snapshot.usecs / snapshot.calls;
        }
        snapshot
    }
}

/// Externalized per-command summary. Field names are the stable JSON
/// contract consumed by admin and metrics exporters.
#[derive(Debug, Clone, Serialize)]
pub struct OpStatsSnapshot {
    pub opstr: String,
    pub interval: i64,
    pub total_calls: i64,
    pub total_usecs: i64,
    pub usecs_percall: i64,

    pub calls: i64,
    pub usecs: i64,
    pub fails: i64,
    pub redis_errtype: i64,
    pub qps: i64,
    pub avg: i64,
    pub tp90: i64,
    pub tp99: i64,
    pub tp999: i64,
    pub tp9999: i64,
    pub tp100: i64,

    pub delay50ms: i64,
    pub delay100ms: i64,
    pub delay200ms: i64,
    pub delay300ms: i64,
    pub delay500ms: i64,
    pub delay1s: i64,
    pub delay2s: i64,
    pub delay3s: i64,
}
