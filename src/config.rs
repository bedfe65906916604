use crate::error::{StatsError, StatsResult};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Initial values for the telemetry engine knobs.
///
/// All of these can be overridden at runtime through the engine's setters;
/// the config only seeds them at construction.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Spacing between aggregator ticks, seconds. 0 disables the aggregator
    /// and the slow-op loop; values below 1 are still slept as 1 second.
    #[serde(default = "default_refresh_period_secs")]
    pub refresh_period_secs: i64,

    /// Threshold on the 1-second window's tp100, microseconds (same unit as
    /// redis `slowlog-log-slower-than`).
    #[serde(default)]
    pub log_slower_than_us: i64,

    /// Whether the slow-op controller may flag commands automatically.
    #[serde(default)]
    pub auto_set_slow_flag: bool,

    /// How long the system sampler backs off after a failed sample, seconds.
    #[serde(default = "default_sys_sample_backoff_secs")]
    pub sys_sample_backoff_secs: u64,
}

fn default_refresh_period_secs() -> i64 {
    1
}

fn default_sys_sample_backoff_secs() -> u64 {
    5
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            refresh_period_secs: default_refresh_period_secs(),
            log_slower_than_us: 0,
            auto_set_slow_flag: false,
            sys_sample_backoff_secs: default_sys_sample_backoff_secs(),
        }
    }
}

impl StatsConfig {
    pub fn sys_sample_backoff(&self) -> Duration {
        Duration::from_secs(self.sys_sample_backoff_secs)
    }
}

fn validate_config(cfg: &StatsConfig) -> StatsResult<()> {
    if cfg.refresh_period_secs < 0 {
        return Err(StatsError::InvalidConfig(
            "refresh_period_secs must be >= 0".into(),
        ));
    }

    if cfg.log_slower_than_us < 0 {
        return Err(StatsError::InvalidConfig(
            "log_slower_than_us must be >= 0".into(),
        ));
    }

    if cfg.sys_sample_backoff_secs == 0 {
        return Err(StatsError::InvalidConfig(
            "sys_sample_backoff_secs must be > 0".into(),
        ));
    }

    Ok(())
}

pub fn from_toml_str(contents: &str) -> StatsResult<StatsConfig> {
    let config: StatsConfig = toml::from_str(contents)?; // StatsError::ConfigToml
    validate_config(&config)?;
    Ok(config)
}

pub fn load_stats_config(path: impl AsRef<Path>) -> StatsResult<StatsConfig> {
    let contents = fs::read_to_string(path)?; // StatsError::ConfigIo
    from_toml_str(&contents)
}
