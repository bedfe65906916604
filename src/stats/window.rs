use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::stats::delay::{DELAY_KIND_NUM, TP_BUCKET_NUM, TP_DELAY_MS};

/// `nsecs_max` may lag the true maximum by up to this much under concurrent
/// updates; the slack bounds CAS retries on the hot path. Do not tighten.
const NSECS_MAX_SLACK_NS: i64 = 5_000_000;

/// Counters and histogram for one rolling interval.
///
/// The raw accumulators (`calls`, `nsecs`, `nsecs_max`, `histogram`,
/// `delay_count`) are updated lock-free by session handlers. The derived
/// fields are published by the aggregator on each refresh and read with
/// relaxed loads; readers may observe values up to one refresh cycle stale.
pub struct WindowStats {
    interval_secs: i64,

    calls: AtomicI64,
    nsecs: AtomicI64,
    nsecs_max: AtomicI64,
    histogram: [AtomicI64; TP_BUCKET_NUM],
    delay_count: [AtomicI64; DELAY_KIND_NUM],

    qps: AtomicI64,
    avg_ms: AtomicI64,
    tp90_ms: AtomicI64,
    tp99_ms: AtomicI64,
    tp999_ms: AtomicI64,
    tp9999_ms: AtomicI64,
    tp100_ms: AtomicI64,
    delays: [AtomicI64; DELAY_KIND_NUM],
}

impl WindowStats {
    pub fn new(interval_secs: i64) -> Self {
        Self {
            interval_secs,
            calls: AtomicI64::new(0),
            nsecs: AtomicI64::new(0),
            nsecs_max: AtomicI64::new(0),
            histogram: std::array::from_fn(|_| AtomicI64::new(0)),
            delay_count: std::array::from_fn(|_| AtomicI64::new(0)),
            qps: AtomicI64::new(0),
            avg_ms: AtomicI64::new(0),
            tp90_ms: AtomicI64::new(0),
            tp99_ms: AtomicI64::new(0),
            tp999_ms: AtomicI64::new(0),
            tp9999_ms: AtomicI64::new(0),
            tp100_ms: AtomicI64::new(0),
            delays: std::array::from_fn(|_| AtomicI64::new(0)),
        }
    }

    #[inline]
    pub fn interval_secs(&self) -> i64 {
        self.interval_secs
    }

    /// Hot path: fold one observed duration into this window.
    ///
    /// The bucket is precomputed once by the caller and shared across all
    /// five windows.
    #[inline]
    pub fn record(&self, duration_ns: i64, bucket: usize) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.nsecs.fetch_add(duration_ns, Ordering::Relaxed);
        self.update_max(duration_ns);
        self.histogram[bucket].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_delay(&self, kind: usize) {
        self.delay_count[kind].fetch_add(1, Ordering::Relaxed);
    }

    /// CAS-loop max update with a 5 ms slack: bail out as soon as the
    /// current max is already within the slack of the candidate.
    #[inline]
    fn update_max(&self, duration_ns: i64) {
        let mut last = self.nsecs_max.load(Ordering::Relaxed);
        while duration_ns >= last + NSECS_MAX_SLACK_NS {
            match self.nsecs_max.compare_exchange_weak(
                last,
                duration_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => last = current,
            }
        }
    }

    // ------------------------------------------------------------
    // Aggregator side
    // ------------------------------------------------------------

    /// Publish derived fields from the raw accumulators, then reset the
    /// accumulators. `elapsed` is the wall time since this window's last
    /// refresh; the caller holds the registry read-lock.
    ///
    /// Concurrent hot-path increments between the reads and the reset can
    /// fall into either the ending or the starting interval; the loss is
    /// bounded by one refresh pass.
    pub fn refresh(&self, elapsed: Duration, opstr: &str) {
        let calls = self.calls.load(Ordering::Relaxed);

        let qps = if elapsed.is_zero() {
            0
        } else {
            ((calls.max(0) as f64) / elapsed.as_secs_f64() + 0.5) as i64
        };
        self.qps.store(qps, Ordering::Relaxed);

        self.refresh_tp(calls, opstr);
        self.tp100_ms
            .store(self.nsecs_max.load(Ordering::Relaxed) / 1_000_000, Ordering::Relaxed);

        let avg = if calls != 0 {
            self.nsecs.load(Ordering::Relaxed) / 1_000_000 / calls
        } else {
            0
        };
        self.avg_ms.store(avg, Ordering::Relaxed);

        self.calls.store(0, Ordering::Relaxed);
        self.nsecs.store(0, Ordering::Relaxed);
        self.nsecs_max.store(0, Ordering::Relaxed);
        for bucket in &self.histogram {
            bucket.store(0, Ordering::Relaxed);
        }

        for (published, raw) in self.delays.iter().zip(&self.delay_count) {
            published.store(raw.swap(0, Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Rank extraction: walk the histogram once, resolving the four targets
    /// in ascending order against a running prefix sum.
    fn refresh_tp(&self, calls: i64, opstr: &str) {
        if calls == 0 {
            self.tp90_ms.store(0, Ordering::Relaxed);
            self.tp99_ms.store(0, Ordering::Relaxed);
            self.tp999_ms.store(0, Ordering::Relaxed);
            self.tp9999_ms.store(0, Ordering::Relaxed);
            return;
        }

        let targets = [
            (calls as f64 * 0.9) as i64,
            (calls as f64 * 0.99) as i64,
            (calls as f64 * 0.999) as i64,
            (calls as f64 * 0.9999) as i64,
        ];
        let mut indices = [TP_BUCKET_NUM - 1; 4];
        let mut next = 0usize;
        let mut prefix = 0i64;

        for i in 0..TP_BUCKET_NUM {
            let count = self.histogram[i].load(Ordering::Relaxed);
            prefix += count;
            while next < targets.len() && prefix >= targets[next] {
                indices[next] = i;
                next += 1;
            }
            if next == targets.len() {
                break;
            }
            if i == TP_BUCKET_NUM - 1 && count <= 0 {
                // The walk was pushed into an empty overflow bucket; the
                // histogram cannot satisfy the remaining targets.
                tracing::warn!(cmd = %opstr, "tp refresh: histogram unavailable");
                self.tp90_ms.store(-1, Ordering::Relaxed);
                self.tp99_ms.store(-1, Ordering::Relaxed);
                self.tp999_ms.store(-1, Ordering::Relaxed);
                self.tp9999_ms.store(-1, Ordering::Relaxed);
                return;
            }
        }

        self.tp90_ms.store(TP_DELAY_MS[indices[0]], Ordering::Relaxed);
        self.tp99_ms.store(TP_DELAY_MS[indices[1]], Ordering::Relaxed);
        self.tp999_ms.store(TP_DELAY_MS[indices[2]], Ordering::Relaxed);
        self.tp9999_ms.store(TP_DELAY_MS[indices[3]], Ordering::Relaxed);
    }

    // ------------------------------------------------------------
    // Raw accumulator reads (snapshot + tests)
    // ------------------------------------------------------------

    #[inline]
    pub fn calls(&self) -> i64 {
        self.calls.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn nsecs(&self) -> i64 {
        self.nsecs.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn nsecs_max(&self) -> i64 {
        self.nsecs_max.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bucket_count(&self, index: usize) -> i64 {
        self.histogram[index].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn delay_count(&self, kind: usize) -> i64 {
        self.delay_count[kind].load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------
    // Published derived reads
    // ------------------------------------------------------------

    #[inline]
    pub fn qps(&self) -> i64 {
        self.qps.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn avg_ms(&self) -> i64 {
        self.avg_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tp90_ms(&self) -> i64 {
        self.tp90_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tp99_ms(&self) -> i64 {
        self.tp99_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tp999_ms(&self) -> i64 {
        self.tp999_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tp9999_ms(&self) -> i64 {
        self.tp9999_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tp100_ms(&self) -> i64 {
        self.tp100_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn delay(&self, kind: usize) -> i64 {
        self.delays[kind].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::delay::bucket_index;

    const MS: i64 = 1_000_000;

    fn record_ms(w: &WindowStats, ms: i64) {
        w.record(ms * MS, bucket_index(ms * MS));
    }

    #[test]
    fn histogram_counts_match_calls() {
        let w = WindowStats::new(1);
        for ms in 1..=500 {
            record_ms(&w, ms);
        }
        assert_eq!(w.calls(), 500);
        let total: i64 = (0..TP_BUCKET_NUM).map(|i| w.bucket_count(i)).sum();
        assert_eq!(total, 500);
    }

    #[test]
    fn max_tracks_largest_duration_within_slack() {
        let w = WindowStats::new(1);
        record_ms(&w, 10);
        record_ms(&w, 400);
        record_ms(&w, 30);
        assert_eq!(w.nsecs_max(), 400 * MS);

        // Within 5 ms of the current max: skipped on purpose.
        record_ms(&w, 403);
        assert_eq!(w.nsecs_max(), 400 * MS);

        record_ms(&w, 406);
        assert_eq!(w.nsecs_max(), 406 * MS);
    }

    #[test]
    fn refresh_publishes_and_resets() {
        let w = WindowStats::new(1);
        for _ in 0..10 {
            record_ms(&w, 100);
        }
        w.refresh(Duration::from_secs(1), "GET");

        assert_eq!(w.qps(), 10);
        assert_eq!(w.avg_ms(), 100);
        assert_eq!(w.tp100_ms(), 100);
        assert_eq!(w.tp90_ms(), 100);
        assert_eq!(w.tp9999_ms(), 100);

        assert_eq!(w.calls(), 0);
        assert_eq!(w.nsecs(), 0);
        assert_eq!(w.nsecs_max(), 0);
        let total: i64 = (0..TP_BUCKET_NUM).map(|i| w.bucket_count(i)).sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn refresh_of_empty_window_zeroes_everything() {
        let w = WindowStats::new(1);
        w.refresh(Duration::from_secs(1), "GET");
        assert_eq!(w.qps(), 0);
        assert_eq!(w.avg_ms(), 0);
        assert_eq!(w.tp90_ms(), 0);
        assert_eq!(w.tp99_ms(), 0);
        assert_eq!(w.tp999_ms(), 0);
        assert_eq!(w.tp9999_ms(), 0);
        assert_eq!(w.tp100_ms(), 0);
    }

    #[test]
    fn percentiles_over_uniform_distribution() {
        let w = WindowStats::new(1);
        // 10_000 samples, each millisecond in 1..=1000 seen ten times.
        for ms in 1..=1000 {
            for _ in 0..10 {
                record_ms(&w, ms);
            }
        }
        w.refresh(Duration::from_secs(1), "GET");

        // Rank targets resolve to bucket upper edges: the 9000th sample sits
        // in (700, 950], the 9900th and above in (950, 1200].
        assert_eq!(w.tp90_ms(), 950);
        assert_eq!(w.tp99_ms(), 1200);
        assert_eq!(w.tp999_ms(), 1200);
        assert_eq!(w.tp9999_ms(), 1200);
        assert_eq!(w.tp100_ms(), 1000);
        assert_eq!(w.avg_ms(), 500);
        assert!(w.tp90_ms() <= w.tp99_ms());
        assert!(w.tp99_ms() <= w.tp999_ms());
        assert!(w.tp999_ms() <= w.tp9999_ms());
    }

    #[test]
    fn percentiles_single_bucket() {
        let w = WindowStats::new(1);
        for _ in 0..100 {
            record_ms(&w, 3);
        }
        w.refresh(Duration::from_secs(1), "GET");
        assert_eq!(w.tp90_ms(), 5);
        assert_eq!(w.tp99_ms(), 5);
        assert_eq!(w.tp999_ms(), 5);
        assert_eq!(w.tp9999_ms(), 5);
    }

    #[test]
    fn delay_counters_swap_on_refresh() {
        let w = WindowStats::new(1);
        w.incr_delay(0);
        w.incr_delay(0);
        w.incr_delay(3);
        assert_eq!(w.delay_count(0), 2);

        w.refresh(Duration::from_secs(1), "GET");
        assert_eq!(w.delay(0), 2);
        assert_eq!(w.delay(3), 1);
        assert_eq!(w.delay(7), 0);
        assert_eq!(w.delay_count(0), 0);

        w.refresh(Duration::from_secs(1), "GET");
        assert_eq!(w.delay(0), 0);
    }

    #[test]
    fn qps_normalizes_over_elapsed() {
        let w = WindowStats::new(10);
        for _ in 0..5000 {
            record_ms(&w, 1);
        }
        w.refresh(Duration::from_secs(10), "GET");
        assert_eq!(w.qps(), 500);
    }
}
