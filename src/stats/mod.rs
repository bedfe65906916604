pub mod aggregator;
pub mod delay;
pub mod op;
pub mod registry;
pub mod sessions;
pub mod slowop;
pub mod sysusage;
pub mod window;

pub use op::{OpStatsSnapshot, RespType, ALL_OPS};
pub use slowop::{NullSlowOpSink, SlowOpSink};
pub use sysusage::SysUsage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tokio::task::JoinHandle;

use crate::config::StatsConfig;
use aggregator::Aggregator;
use registry::StatsRegistry;
use sessions::SessionGauges;
use slowop::{unix_nanos, SlowOpController};
use sysusage::SysUsageSampler;

/// Command-latency telemetry engine.
///
/// Session handlers report completed requests through [`incr_op_stats`]
/// and failures through [`incr_op_fails`]; three background activities
/// (aggregator, slow-op controller, system sampler) derive QPS, tail
/// percentiles and slow flags; admin and exporters pull summaries with
/// [`get_op_stats_by_interval`].
///
/// [`incr_op_stats`]: ProxyStats::incr_op_stats
/// [`incr_op_fails`]: ProxyStats::incr_op_fails
/// [`get_op_stats_by_interval`]: ProxyStats::get_op_stats_by_interval
pub struct ProxyStats {
    registry: Arc<StatsRegistry>,
    sessions: SessionGauges,
    sys_usage: Arc<ArcSwapOption<SysUsage>>,
    sink: Arc<dyn SlowOpSink>,
    stop: Arc<AtomicBool>,
    sys_sample_backoff: Duration,
}

impl ProxyStats {
    pub fn new(cfg: &StatsConfig, sink: Arc<dyn SlowOpSink>) -> Self {
        let registry = Arc::new(StatsRegistry::new());
        registry.set_refresh_period(Duration::from_secs(cfg.refresh_period_secs.max(0) as u64));
        registry.set_log_slower_than_us(cfg.log_slower_than_us);
        registry.store_auto_set_slow_flag(cfg.auto_set_slow_flag);

        Self {
            registry,
            sessions: SessionGauges::new(),
            sys_usage: Arc::new(ArcSwapOption::from(None)),
            sink,
            stop: Arc::new(AtomicBool::new(false)),
            sys_sample_backoff: cfg.sys_sample_backoff(),
        }
    }

    /// Launch the three background activities. They run until
    /// [`shutdown`](ProxyStats::shutdown); call once.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Aggregator::new(self.registry.clone()).run(self.stop.clone())),
            tokio::spawn(
                SlowOpController::new(self.registry.clone(), self.sink.clone())
                    .run(self.stop.clone()),
            ),
            tokio::spawn(
                SysUsageSampler::new(self.sys_usage.clone(), self.sys_sample_backoff)
                    .run(self.stop.clone()),
            ),
        ]
    }

    /// Ask the background activities to exit; each observes the flag on its
    /// next tick.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    // ------------------------------------------------------------
    // Hot-path ingress
    // ------------------------------------------------------------

    /// Record one completed request: latency is `received_at.elapsed()`,
    /// dispatched to both the named op and the `"ALL"` aggregate.
    #[inline]
    pub fn incr_op_stats(&self, opstr: &str, received_at: Instant, resp: RespType) {
        self.incr_op_stats_ns(opstr, received_at.elapsed().as_nanos() as i64, resp);
    }

    /// Same as [`incr_op_stats`](ProxyStats::incr_op_stats) for callers that
    /// already measured the response time.
    pub fn incr_op_stats_ns(&self, opstr: &str, duration_ns: i64, resp: RespType) {
        self.registry.get_or_create(opstr).incr(duration_ns, resp);
        self.registry.get_or_create(ALL_OPS).incr(duration_ns, resp);

        if resp == RespType::Error {
            self.registry.incr_redis_errors();
        }
    }

    pub fn incr_op_fails(&self, opstr: &str) {
        self.registry.get_or_create(opstr).incr_fails();
        self.registry.get_or_create(ALL_OPS).incr_fails();
        self.registry.incr_fails();
    }

    #[inline]
    pub fn incr_op_total(&self) {
        self.registry.incr_total();
    }

    #[inline]
    pub fn incr_op_redis_errors(&self) {
        self.registry.incr_redis_errors();
    }

    // ------------------------------------------------------------
    // Egress
    // ------------------------------------------------------------

    /// Sorted snapshots for every op, against the window matching
    /// `interval_secs` (window 0 when there is no match).
    pub fn get_op_stats_by_interval(&self, interval_secs: i64) -> Vec<OpStatsSnapshot> {
        self.registry.snapshots_by_interval(interval_secs)
    }

    #[inline]
    pub fn op_total(&self) -> i64 {
        self.registry.total()
    }

    #[inline]
    pub fn op_fails(&self) -> i64 {
        self.registry.fails()
    }

    #[inline]
    pub fn op_redis_errors(&self) -> i64 {
        self.registry.redis_errors()
    }

    #[inline]
    pub fn op_qps(&self) -> i64 {
        self.registry.qps()
    }

    /// Latest published system snapshot, if the sampler has produced one.
    pub fn get_sys_usage(&self) -> Option<Arc<SysUsage>> {
        self.sys_usage.load_full()
    }

    // ------------------------------------------------------------
    // Tuning knobs
    // ------------------------------------------------------------

    /// Zero disables the aggregator and the slow-op loop. Takes effect on
    /// the next tick.
    pub fn set_refresh_period(&self, period: Duration) {
        self.registry.set_refresh_period(period);
    }

    /// Threshold on the 1-second window's tp100, microseconds.
    pub fn set_log_slower_than_us(&self, threshold_us: i64) {
        self.registry.set_log_slower_than_us(threshold_us);
    }

    /// Disabling sweeps every op's slow flag under the write lock, so a
    /// concurrent controller pass cannot leave a flag stuck.
    pub fn set_auto_set_slow_flag(&self, enabled: bool) {
        self.registry.store_auto_set_slow_flag(enabled);
        if !enabled {
            self.registry.clear_all_slow(self.sink.as_ref(), unix_nanos());
        }
    }

    /// Zero lifetime totals (per-op and process-wide) and rebase the session
    /// gauge. Windowed counters and the op map itself are untouched.
    pub fn reset_stats(&self) {
        self.registry.reset();
        self.sessions.rebase_total();
    }

    // ------------------------------------------------------------
    // Session gauges
    // ------------------------------------------------------------

    /// Returns the alive count including the new session.
    #[inline]
    pub fn incr_sessions(&self) -> i64 {
        self.sessions.incr()
    }

    #[inline]
    pub fn decr_sessions(&self) {
        self.sessions.decr()
    }

    #[inline]
    pub fn sessions_total(&self) -> i64 {
        self.sessions.total()
    }

    #[inline]
    pub fn sessions_alive(&self) -> i64 {
        self.sessions.alive()
    }

    pub(crate) fn registry(&self) -> &Arc<StatsRegistry> {
        &self.registry
    }
}
