//! In-process command-latency telemetry for a sharded Redis-compatible
//! proxy.
//!
//! Session handlers report each completed request; the engine bucketizes
//! latencies into a 70-bucket histogram, maintains five rolling windows
//! (1 s to 1 h) of counters and tail percentiles, derives QPS, and drives
//! a slow-command auto-flagging loop with hysteresis. Hot-path updates are
//! atomics only; a reader-writer lock guards nothing but the op map's
//! structure.

pub mod config;
pub mod error;
pub mod stats;

pub use config::{load_stats_config, StatsConfig};
pub use error::{StatsError, StatsResult};
pub use stats::{
    NullSlowOpSink, OpStatsSnapshot, ProxyStats, RespType, SlowOpSink, SysUsage, ALL_OPS,
};

#[cfg(test)]
mod tests;
