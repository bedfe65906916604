// End-to-end flow over a live engine: background tasks running, traffic
// fed from a spawned session-like task, assertions on the externally
// visible surface only.
//
// Timing below is deliberately coarse (whole aggregator cycles plus slack)
// so the test is stable on loaded CI machines.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

use crate::config::StatsConfig;
use crate::stats::{ProxyStats, RespType, SlowOpSink};

const MS: i64 = 1_000_000;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, bool)>>,
}

impl RecordingSink {
    fn count(&self, opstr: &str, set: bool) -> usize {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .iter()
            .filter(|(op, s)| op == opstr && *s == set)
            .count()
    }
}

impl SlowOpSink for RecordingSink {
    fn set_may_slow(&self, opstr: &str) {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .push((opstr.to_string(), true));
    }

    fn clear_may_slow(&self, opstr: &str) {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .push((opstr.to_string(), false));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_derives_metrics_and_flags_slow_ops() {
    let cfg = StatsConfig {
        refresh_period_secs: 1,
        log_slower_than_us: 50_000, // 50 ms
        auto_set_slow_flag: true,
        sys_sample_backoff_secs: 5,
    };
    let sink = Arc::new(RecordingSink::default());
    let stats = Arc::new(ProxyStats::new(&cfg, sink.clone()));
    let tasks = stats.spawn_background();

    // Steady 60 ms GET traffic, ~100 requests/s.
    let feeder = {
        let stats = stats.clone();
        tokio::spawn(async move {
            loop {
                stats.incr_op_total();
                stats.incr_op_stats_ns("GET", 60 * MS, RespType::Bulk);
                sleep(Duration::from_millis(10)).await;
            }
        })
    };

    // Two full aggregator cycles plus slack.
    sleep(Duration::from_millis(2500)).await;

    let snapshots = stats.get_op_stats_by_interval(1);
    let get = snapshots
        .iter()
        .find(|s| s.opstr == "GET")
        .expect("GET snapshot present");
    assert!(get.total_calls > 0);
    assert_eq!(get.tp100, 60);
    assert_eq!(get.avg, 60);
    assert!(get.qps > 0);
    assert!(get.delay50ms > 0);
    assert_eq!(get.delay100ms, 0);

    assert!(stats.op_qps() > 0, "process-wide qps published");
    assert!(stats.get_sys_usage().is_some(), "sampler published a snapshot");
    assert!(sink.count("GET", true) >= 1, "slow flag was set");
    assert_eq!(sink.count("ALL", true), 0, "aggregate op is never flagged");

    // Traffic stops; after the quiet period the flag is cleared exactly once.
    feeder.abort();
    sleep(Duration::from_millis(5500)).await;

    assert_eq!(sink.count("GET", false), 1, "slow flag cleared once");

    stats.shutdown();
    drop(tasks);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_refresh_period_disables_aggregation() {
    let cfg = StatsConfig {
        refresh_period_secs: 0,
        ..StatsConfig::default()
    };
    let sink = Arc::new(RecordingSink::default());
    let stats = Arc::new(ProxyStats::new(&cfg, sink.clone()));
    let tasks = stats.spawn_background();

    for _ in 0..50 {
        stats.incr_op_total();
        stats.incr_op_stats_ns("SET", 200 * MS, RespType::Status);
    }
    sleep(Duration::from_millis(2500)).await;

    let snapshots = stats.get_op_stats_by_interval(1);
    let set = snapshots
        .iter()
        .find(|s| s.opstr == "SET")
        .expect("SET snapshot present");

    // Raw accumulators keep growing but nothing was derived or reset.
    assert_eq!(set.calls, 50);
    assert_eq!(set.tp100, 0);
    assert_eq!(set.qps, 0);
    assert_eq!(stats.op_qps(), 0);
    assert_eq!(sink.count("SET", true), 0);

    stats.shutdown();
    drop(tasks);
}
