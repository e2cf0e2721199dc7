//! Metrics sources for Vigie agents
//!
//! A `MetricsSource` exposes one optional reading per metric so platform
//! differences live in the implementation, not in the sampler:
//! - `HostSource`: full desktop/laptop/server host (sysinfo + sysfs battery)
//! - `TermuxSource`: restricted Android sandbox, battery only via
//!   `termux-battery-status`

mod host;
mod termux;

pub use host::HostSource;
pub use termux::TermuxSource;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

/// Why a single reading could not be taken
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricUnavailable {
    #[error("permission denied")]
    PermissionDenied,
    #[error("not found")]
    NotFound,
}

/// Space usage of one mounted filesystem, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionUsage {
    pub total: u64,
    pub used: u64,
}

/// Cumulative byte counters summed over all interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Battery state; either field may be unknown
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub percent: Option<f32>,
    pub plugged: Option<bool>,
}

/// OS-level accessors used by the sampler. Every reading is optional.
#[async_trait]
pub trait MetricsSource: Send {
    fn name(&self) -> &'static str;

    /// Start a CPU measurement window; `cpu_percent` reports usage since then
    fn begin_cpu_window(&mut self) {}

    fn cpu_percent(&mut self) -> Option<f32>;

    fn memory_percent(&mut self) -> Option<f32>;

    /// One entry per mounted partition, unreadable ones as errors.
    /// `None` when the platform cannot enumerate partitions at all.
    fn partitions(&mut self) -> Option<Vec<Result<PartitionUsage, MetricUnavailable>>>;

    fn net_counters(&mut self) -> Option<NetCounters>;

    /// `None` when the host has no battery sensor. Async because some
    /// platforms only expose it through an external helper.
    async fn battery(&mut self) -> Option<BatteryReading>;
}

#[async_trait]
impl<T: MetricsSource + ?Sized> MetricsSource for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn begin_cpu_window(&mut self) {
        (**self).begin_cpu_window()
    }

    fn cpu_percent(&mut self) -> Option<f32> {
        (**self).cpu_percent()
    }

    fn memory_percent(&mut self) -> Option<f32> {
        (**self).memory_percent()
    }

    fn partitions(&mut self) -> Option<Vec<Result<PartitionUsage, MetricUnavailable>>> {
        (**self).partitions()
    }

    fn net_counters(&mut self) -> Option<NetCounters> {
        (**self).net_counters()
    }

    async fn battery(&mut self) -> Option<BatteryReading> {
        (**self).battery().await
    }
}

/// Which source to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Auto,
    Full,
    Termux,
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Platform::Auto),
            "full" => Ok(Platform::Full),
            "termux" => Ok(Platform::Termux),
            other => Err(format!("unknown platform {other:?}")),
        }
    }
}

impl Platform {
    /// Resolve `Auto` from the process environment
    pub fn resolve<F>(self, env: F) -> Platform
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            Platform::Auto => {
                let in_termux = env("TERMUX_VERSION").is_some()
                    || env("PREFIX").is_some_and(|p| p.contains("com.termux"));
                if in_termux {
                    Platform::Termux
                } else {
                    Platform::Full
                }
            }
            other => other,
        }
    }
}

/// Build the metrics source for a platform already passed through
/// `Platform::resolve`; an unresolved `Auto` gets the full host source.
pub fn select_source(platform: Platform) -> Box<dyn MetricsSource> {
    let source: Box<dyn MetricsSource> = match platform {
        Platform::Termux => Box::new(TermuxSource::new()),
        _ => Box::new(HostSource::new()),
    };
    info!("Using metrics source: {}", source.name());
    source
}
