//! Restricted Android (Termux) source
//!
//! The sandbox exposes neither /proc/stat nor per-mount statistics, so every
//! reading is absent except the battery, which comes from the
//! `termux-battery-status` helper of the Termux:API package.

use super::{BatteryReading, MetricUnavailable, MetricsSource, NetCounters, PartitionUsage};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

const BATTERY_HELPER: &str = "termux-battery-status";

#[derive(Debug, Deserialize)]
struct TermuxBattery {
    percentage: Option<f32>,
    plugged: Option<String>,
}

pub struct TermuxSource {
    helper: String,
}

impl TermuxSource {
    pub fn new() -> Self {
        Self { helper: BATTERY_HELPER.to_string() }
    }
}

impl Default for TermuxSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the helper's JSON output. `PLUGGED_AC`, `PLUGGED_USB` and
/// `PLUGGED_WIRELESS` count as plugged, `UNPLUGGED` does not.
fn parse_battery_status(output: &[u8]) -> Option<BatteryReading> {
    let status: TermuxBattery = serde_json::from_slice(output).ok()?;
    let plugged = status.plugged.map(|p| p.starts_with("PLUGGED"));
    Some(BatteryReading { percent: status.percentage, plugged })
}

#[async_trait]
impl MetricsSource for TermuxSource {
    fn name(&self) -> &'static str {
        "termux"
    }

    fn cpu_percent(&mut self) -> Option<f32> {
        None
    }

    fn memory_percent(&mut self) -> Option<f32> {
        None
    }

    fn partitions(&mut self) -> Option<Vec<Result<PartitionUsage, MetricUnavailable>>> {
        None
    }

    fn net_counters(&mut self) -> Option<NetCounters> {
        None
    }

    async fn battery(&mut self) -> Option<BatteryReading> {
        match Command::new(&self.helper).kill_on_drop(true).output().await {
            Ok(out) if out.status.success() => parse_battery_status(&out.stdout),
            Ok(out) => {
                debug!("{} exited with {}", self.helper, out.status);
                None
            }
            Err(e) => {
                debug!("{} unavailable: {}", self.helper, e);
                None
            }
        }
    }
}
