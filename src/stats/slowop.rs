use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::sleep;

use crate::stats::aggregator::sleep_for;
use crate::stats::op::ALL_OPS;
use crate::stats::registry::StatsRegistry;

/// The slow flag outlives the condition by this many refresh periods
/// before it is cleared.
const CLEAR_SLOW_FLAG_PERIOD_RATE: i64 = 3;

/// Proxy-side slow-flag mutations, injected by the embedding proxy. The
/// flag gates slow-query logging on the request path; implementations are
/// expected to be cheap atomic flips.
pub trait SlowOpSink: Send + Sync {
    fn set_may_slow(&self, opstr: &str);
    fn clear_may_slow(&self, opstr: &str);
}

/// Sink for embedders that do not gate slow-query logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSlowOpSink;

impl SlowOpSink for NullSlowOpSink {
    fn set_may_slow(&self, _opstr: &str) {}
    fn clear_may_slow(&self, _opstr: &str) {}
}

/// Periodically flags ops whose 1-second-window tp100 crosses the
/// threshold, and clears flags that have been quiet long enough.
///
/// Set and clear run in the same loop so a flag set just before a pause
/// cannot be orphaned by ordering between two activities.
pub struct SlowOpController {
    registry: Arc<StatsRegistry>,
    sink: Arc<dyn SlowOpSink>,
}

impl SlowOpController {
    pub fn new(registry: Arc<StatsRegistry>, sink: Arc<dyn SlowOpSink>) -> Self {
        Self { registry, sink }
    }

    pub async fn run(self, stop: Arc<AtomicBool>) {
        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            let period_ns = self.registry.refresh_period_ns();
            if period_ns <= 0 || !self.registry.auto_set_slow_flag() {
                sleep(Duration::from_secs(1)).await;
                continue;
            }

            let clear_after_ns = period_ns * CLEAR_SLOW_FLAG_PERIOD_RATE;
            sleep(sleep_for(period_ns)).await;

            self.evaluate_once(unix_nanos(), clear_after_ns);
        }
    }

    /// One evaluation pass under the registry read lock.
    ///
    /// The auto flag is re-checked inside the lock: a concurrent disable
    /// sweep holds the write lock while clearing, so once it completes no
    /// stale pass can re-set a flag.
    pub(crate) fn evaluate_once(&self, now_ns: i64, clear_after_ns: i64) {
        let ops = self.registry.ops();
        if !self.registry.auto_set_slow_flag() {
            return;
        }

        let threshold_us = self.registry.log_slower_than_us();
        for op in ops.values() {
            if op.opstr() == ALL_OPS {
                continue;
            }
            // tp100 has millisecond resolution, the threshold microsecond
            // resolution (redis slowlog convention).
            if op.window(0).tp100_ms() * 1_000 > threshold_us {
                self.sink.set_may_slow(op.opstr());
                op.set_last_set_slow_ns(now_ns);
            } else if op.last_set_slow_ns() >= op.last_clear_slow_ns()
                && now_ns - op.last_set_slow_ns() >= clear_after_ns
            {
                self.sink.clear_may_slow(op.opstr());
                op.set_last_clear_slow_ns(now_ns);
            }
        }
    }
}

pub(crate) fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
