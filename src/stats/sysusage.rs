use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Pid, ProcessExt, System, SystemExt};

use crate::error::{StatsError, StatsResult};

/// CPU is sampled over this wall window; it also paces the sampler loop.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Point-in-time process usage. On a failed sample only `now` is
/// meaningful and the remaining fields are zero.
#[derive(Debug, Clone, Serialize)]
pub struct SysUsage {
    pub now: DateTime<Utc>,
    /// Process CPU over the last sample window, percent of one core.
    pub cpu: f64,
    /// Resident set size, bytes.
    pub mem: u64,
    /// Virtual memory size, bytes.
    pub virt: u64,
}

impl SysUsage {
    fn now_only() -> Self {
        Self {
            now: Utc::now(),
            cpu: 0.0,
            mem: 0,
            virt: 0,
        }
    }
}

/// Background sampler publishing into a single atomically-swapped slot.
/// Consumers always see the latest complete snapshot or none at all.
pub struct SysUsageSampler {
    slot: Arc<ArcSwapOption<SysUsage>>,
    backoff: Duration,
}

impl SysUsageSampler {
    pub fn new(slot: Arc<ArcSwapOption<SysUsage>>, backoff: Duration) -> Self {
        Self { slot, backoff }
    }

    pub async fn run(self, stop: Arc<AtomicBool>) {
        let mut system = System::new();
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            tracing::warn!("current pid unavailable, system usage will carry timestamps only");
        }

        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            match sample_once(&mut system, pid).await {
                Ok(usage) => self.slot.store(Some(Arc::new(usage))),
                Err(err) => {
                    tracing::warn!(error = %err, "system usage sample failed");
                    self.slot.store(Some(Arc::new(SysUsage::now_only())));
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

async fn sample_once(system: &mut System, pid: Option<Pid>) -> StatsResult<SysUsage> {
    let pid = pid.ok_or_else(|| StatsError::SysSample("current pid unavailable".into()))?;

    // Two refreshes bracket the window; cpu_usage() is relative to the first.
    system.refresh_process(pid);
    tokio::time::sleep(CPU_SAMPLE_WINDOW).await;
    if !system.refresh_process(pid) {
        return Err(StatsError::SysSample(format!("process {pid} not found")));
    }

    let process = system
        .process(pid)
        .ok_or_else(|| StatsError::SysSample(format!("process {pid} not found")))?;

    Ok(SysUsage {
        now: Utc::now(),
        cpu: f64::from(process.cpu_usage()),
        mem: process.memory(),
        virt: process.virtual_memory(),
    })
}
