use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

use crate::stats::delay::window_index_for_interval;
use crate::stats::op::{OpStats, OpStatsSnapshot};
use crate::stats::slowop::SlowOpSink;

/// String-to-`OpStats` map plus process-wide counters and tuning knobs.
///
/// The lock guards only the map structure: the write lock is taken for lazy
/// insertion and for the slow-flag shutdown sweep, the read lock for
/// iteration and first-phase lookup. Counter updates themselves are atomic
/// and never hold the lock.
pub struct StatsRegistry {
    opmap: RwLock<HashMap<String, Arc<OpStats>>>,

    total: AtomicI64,
    fails: AtomicI64,
    redis_errors: AtomicI64,
    qps: AtomicI64,

    refresh_period_ns: AtomicI64,
    log_slower_than_us: AtomicI64,
    auto_set_slow_flag: AtomicBool,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            // Bounded universe of command names, so size for it up front.
            opmap: RwLock::new(HashMap::with_capacity(128)),
            total: AtomicI64::new(0),
            fails: AtomicI64::new(0),
            redis_errors: AtomicI64::new(0),
            qps: AtomicI64::new(0),
            refresh_period_ns: AtomicI64::new(Duration::from_secs(1).as_nanos() as i64),
            log_slower_than_us: AtomicI64::new(0),
            auto_set_slow_flag: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------
    // Map access
    // ------------------------------------------------------------

    /// Double-checked lazy creation: read-lock lookup first, write lock only
    /// on first sight of a command.
    pub fn get_or_create(&self, opstr: &str) -> Arc<OpStats> {
        if let Some(stats) = self
            .opmap
            .read()
            .expect("opmap lock poisoned")
            .get(opstr)
        {
            return stats.clone();
        }

        let mut map = self.opmap.write().expect("opmap lock poisoned");
        map.entry(opstr.to_string())
            .or_insert_with(|| Arc::new(OpStats::new(opstr)))
            .clone()
    }

    pub fn get(&self, opstr: &str) -> Option<Arc<OpStats>> {
        self.opmap
            .read()
            .expect("opmap lock poisoned")
            .get(opstr)
            .cloned()
    }

    /// Read-locked view for the background loops, scoped to one pass.
    pub(crate) fn ops(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<OpStats>>> {
        self.opmap.read().expect("opmap lock poisoned")
    }

    /// Sorted point-in-time summaries for every op, against the window
    /// matching `interval_secs` (window 0 when there is no match).
    pub fn snapshots_by_interval(&self, interval_secs: i64) -> Vec<OpStatsSnapshot> {
        let index = window_index_for_interval(interval_secs);
        let mut all: Vec<OpStatsSnapshot> = {
            let map = self.ops();
            map.values().map(|op| op.snapshot(index)).collect()
        };
        all.sort_by(|a, b| a.opstr.cmp(&b.opstr));
        all
    }

    /// Zero lifetime totals for every op and the process-wide counters.
    /// Entries are kept: existing holders retain their pointers, and the
    /// windowed counters are untouched.
    pub fn reset(&self) {
        {
            let map = self.ops();
            for op in map.values() {
                op.reset_totals();
            }
        }
        self.total.store(0, Ordering::Relaxed);
        self.fails.store(0, Ordering::Relaxed);
        self.redis_errors.store(0, Ordering::Relaxed);
    }

    /// Clear the slow flag on every op under the write lock, so the slow-op
    /// controller (which iterates under the read lock) cannot interleave a
    /// re-set with this sweep.
    pub(crate) fn clear_all_slow(&self, sink: &dyn SlowOpSink, now_ns: i64) {
        let map = self.opmap.write().expect("opmap lock poisoned");
        for op in map.values() {
            sink.clear_may_slow(op.opstr());
            op.set_last_clear_slow_ns(now_ns);
            tracing::info!(
                op = %op.opstr(),
                last_set_ms = op.last_set_slow_ns() / 1_000_000,
                last_clear_ms = op.last_clear_slow_ns() / 1_000_000,
                "slow flag cleared on auto-flag disable"
            );
        }
    }

    // ------------------------------------------------------------
    // Process-wide counters
    // ------------------------------------------------------------

    #[inline]
    pub fn incr_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_fails(&self) {
        self.fails.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_redis_errors(&self) {
        self.redis_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn total(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fails(&self) -> i64 {
        self.fails.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn redis_errors(&self) -> i64 {
        self.redis_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn qps(&self) -> i64 {
        self.qps.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_qps(&self, qps: i64) {
        self.qps.store(qps, Ordering::Relaxed);
    }

    // ------------------------------------------------------------
    // Tuning knobs
    // ------------------------------------------------------------

    /// Zero disables both background loops; they keep polling for a
    /// non-zero period once per second.
    pub fn set_refresh_period(&self, period: Duration) {
        self.refresh_period_ns
            .store(period.as_nanos() as i64, Ordering::Relaxed);
    }

    #[inline]
    pub fn refresh_period_ns(&self) -> i64 {
        self.refresh_period_ns.load(Ordering::Relaxed)
    }

    /// Negative thresholds are ignored.
    pub fn set_log_slower_than_us(&self, threshold_us: i64) {
        if threshold_us >= 0 {
            self.log_slower_than_us
                .store(threshold_us, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn log_slower_than_us(&self) -> i64 {
        self.log_slower_than_us.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn store_auto_set_slow_flag(&self, enabled: bool) {
        self.auto_set_slow_flag.store(enabled, Ordering::Relaxed);
    }

    #[inline]
    pub fn auto_set_slow_flag(&self) -> bool {
        self.auto_set_slow_flag.load(Ordering::Relaxed)
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
