//! Status sampling
//!
//! Turns point-in-time OS counters into one `StatusSnapshot` per cycle. CPU
//! usage and network throughput are both measured across the same sampling
//! window, so a sample takes about one window of real time.

use crate::metrics::{BatteryReading, MetricUnavailable, MetricsSource, NetCounters, PartitionUsage};
use std::time::Duration;
use tracing::debug;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One reporting cycle worth of metrics; absent fields were unavailable
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub cpu_percent: Option<f32>,
    pub memory_percent: Option<f32>,
    pub disk_percent: Option<f64>,
    pub network_recv_rate: Option<f64>,
    pub network_send_rate: Option<f64>,
    pub battery: Option<BatteryReading>,
}

pub struct Sampler<S> {
    source: S,
    window: Duration,
}

impl<S: MetricsSource> Sampler<S> {
    pub fn new(source: S, window: Duration) -> Self {
        Self { source, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Take one snapshot. Waits for the sampling window without blocking the runtime.
    pub async fn sample(&mut self) -> StatusSnapshot {
        self.source.begin_cpu_window();
        let net_before = self.source.net_counters();

        tokio::time::sleep(self.window).await;

        let net_after = self.source.net_counters();
        let cpu_percent = self.source.cpu_percent();
        let memory_percent = self.source.memory_percent();
        let disk_percent = self.source.partitions().and_then(|p| aggregate_disk(&p));
        let battery = self.source.battery().await;

        let (network_recv_rate, network_send_rate) = match (net_before, net_after) {
            (Some(before), Some(after)) => network_rates(before, after, self.window),
            _ => (None, None),
        };

        let snapshot = StatusSnapshot {
            cpu_percent,
            memory_percent,
            disk_percent,
            network_recv_rate,
            network_send_rate,
            battery,
        };
        debug!(?snapshot, "Sampled status");
        snapshot
    }
}

/// Used/total over every readable partition, rounded to one decimal.
/// Unreadable partitions are skipped; nothing readable gives `None`.
pub fn aggregate_disk(partitions: &[Result<PartitionUsage, MetricUnavailable>]) -> Option<f64> {
    let (total, used) = partitions
        .iter()
        .filter_map(|p| p.as_ref().ok())
        .fold((0u128, 0u128), |(total, used), p| (total + p.total as u128, used + p.used as u128));
    if total == 0 {
        return None;
    }
    Some(round1(used as f64 / total as f64 * 100.0))
}

/// Throughput in MB/s between two counter reads taken `window` apart
pub fn rate_mb_per_sec(first: u64, second: u64, window: Duration) -> Option<f64> {
    let secs = window.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    // counters can reset (interface down/up); never report a negative rate
    let delta = second.saturating_sub(first) as f64;
    Some(round1(delta / BYTES_PER_MB / secs))
}

fn network_rates(before: NetCounters, after: NetCounters, window: Duration) -> (Option<f64>, Option<f64>) {
    (
        rate_mb_per_sec(before.bytes_recv, after.bytes_recv, window),
        rate_mb_per_sec(before.bytes_sent, after.bytes_sent, window),
    )
}

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
