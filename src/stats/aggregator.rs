use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use crate::stats::delay::{INTERVAL_MARK_SECS, INTERVAL_NUM};
use crate::stats::registry::StatsRegistry;

/// Periodically publishes the process-wide QPS and refreshes each window's
/// derived fields once its interval has elapsed.
pub struct Aggregator {
    registry: Arc<StatsRegistry>,
    last_refresh: [Instant; INTERVAL_NUM],
}

impl Aggregator {
    pub fn new(registry: Arc<StatsRegistry>) -> Self {
        Self {
            registry,
            last_refresh: [Instant::now(); INTERVAL_NUM],
        }
    }

    pub async fn run(mut self, stop: Arc<AtomicBool>) {
        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            let period_ns = self.registry.refresh_period_ns();
            if period_ns <= 0 {
                sleep(Duration::from_secs(1)).await;
                continue;
            }

            let start = Instant::now();
            let total_before = self.registry.total();
            sleep(sleep_for(period_ns)).await;

            let delta = self.registry.total() - total_before;
            self.registry.set_qps(normalize_qps(delta, start.elapsed()));

            self.refresh_due_windows();
        }
    }

    /// One pass over the window set: any window whose interval has elapsed
    /// since its last refresh gets every op refreshed under the read lock.
    pub(crate) fn refresh_due_windows(&mut self) {
        let ops = self.registry.ops();
        for index in 0..INTERVAL_NUM {
            let elapsed = self.last_refresh[index].elapsed();
            if (elapsed.as_secs() as i64) < INTERVAL_MARK_SECS[index] {
                continue;
            }
            for op in ops.values() {
                op.refresh_window(index, elapsed);
            }
            self.last_refresh[index] = Instant::now();
        }
    }
}

/// Sleep for the refresh period, clamped up to one second.
pub(crate) fn sleep_for(period_ns: i64) -> Duration {
    Duration::from_nanos(period_ns.max(1_000_000_000) as u64)
}

/// Events per second over the elapsed wall clock, half-up rounded.
pub(crate) fn normalize_qps(delta: i64, elapsed: Duration) -> i64 {
    if elapsed.is_zero() {
        return 0;
    }
    ((delta.max(0) as f64) / elapsed.as_secs_f64() + 0.5) as i64
}
