//! Full-featured host source backed by sysinfo, battery from Linux sysfs

use async_trait::async_trait;
use super::{BatteryReading, MetricUnavailable, MetricsSource, NetCounters, PartitionUsage};
#[cfg(not(unix))]
use std::io::ErrorKind;
use std::path::Path;
use sysinfo::{Disks, Networks, System};
use tracing::debug;

pub struct HostSource {
    sys: System,
    disks: Disks,
    networks: Networks,
}

impl HostSource {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            disks: Disks::new(),
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for HostSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSource for HostSource {
    fn name(&self) -> &'static str {
        "host"
    }

    fn begin_cpu_window(&mut self) {
        self.sys.refresh_cpu_usage();
    }

    fn cpu_percent(&mut self) -> Option<f32> {
        self.sys.refresh_cpu_usage();
        if self.sys.cpus().is_empty() {
            return None;
        }
        Some(self.sys.global_cpu_info().cpu_usage().clamp(0.0, 100.0))
    }

    fn memory_percent(&mut self) -> Option<f32> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return None;
        }
        let used = self.sys.used_memory().min(total);
        Some((used as f64 / total as f64 * 100.0) as f32)
    }

    fn partitions(&mut self) -> Option<Vec<Result<PartitionUsage, MetricUnavailable>>> {
        // the mount list changes (USB keys, network shares), re-enumerate every cycle
        self.disks.refresh_list();
        let readings = self
            .disks
            .list()
            .iter()
            .map(|disk| {
                let mount = disk.mount_point();
                let usage = mount_usage(mount, disk.total_space(), disk.available_space());
                if let Err(e) = &usage {
                    debug!("Skipping mount {}: {}", mount.display(), e);
                }
                usage
            })
            .collect();
        Some(readings)
    }

    fn net_counters(&mut self) -> Option<NetCounters> {
        self.networks.refresh();
        let mut counters = NetCounters { bytes_sent: 0, bytes_recv: 0 };
        let mut seen = 0;
        for (_name, data) in self.networks.iter() {
            counters.bytes_sent += data.total_transmitted();
            counters.bytes_recv += data.total_received();
            seen += 1;
        }
        (seen > 0).then_some(counters)
    }

    async fn battery(&mut self) -> Option<BatteryReading> {
        #[cfg(target_os = "linux")]
        {
            sysfs::read_battery()
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

/// Used space counts every non-free block, reserved blocks included
#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn usage_from_blocks(blocks: u64, blocks_free: u64, fragment_size: u64) -> Option<PartitionUsage> {
    let total = blocks.saturating_mul(fragment_size);
    if total == 0 {
        return None;
    }
    let used = blocks.saturating_sub(blocks_free).saturating_mul(fragment_size);
    Some(PartitionUsage { total, used })
}

#[cfg(unix)]
fn mount_usage(mount: &Path, _total: u64, _available: u64) -> Result<PartitionUsage, MetricUnavailable> {
    use nix::errno::Errno;

    let stat = nix::sys::statvfs::statvfs(mount).map_err(|e| match e {
        Errno::EACCES | Errno::EPERM => MetricUnavailable::PermissionDenied,
        _ => MetricUnavailable::NotFound,
    })?;
    usage_from_blocks(stat.blocks() as u64, stat.blocks_free() as u64, stat.fragment_size() as u64)
        .ok_or(MetricUnavailable::NotFound)
}

/// sysinfo only knows the space available to unprivileged users here
#[cfg(not(unix))]
fn mount_usage(mount: &Path, total: u64, available: u64) -> Result<PartitionUsage, MetricUnavailable> {
    if let Err(e) = std::fs::metadata(mount) {
        return Err(match e.kind() {
            ErrorKind::PermissionDenied => MetricUnavailable::PermissionDenied,
            _ => MetricUnavailable::NotFound,
        });
    }
    if total == 0 {
        return Err(MetricUnavailable::NotFound);
    }
    Ok(PartitionUsage { total, used: total.saturating_sub(available) })
}

/// `/sys/class/power_supply` parsing
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
mod sysfs {
    use super::BatteryReading;
    use std::fs;
    use std::path::Path;

    const POWER_SUPPLY: &str = "/sys/class/power_supply";

    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct SupplyEntry {
        pub kind: String,
        pub capacity: Option<f32>,
        pub status: Option<String>,
        pub online: Option<bool>,
    }

    fn read_attr(dir: &Path, name: &str) -> Option<String> {
        fs::read_to_string(dir.join(name)).ok().map(|s| s.trim().to_string())
    }

    pub fn read_battery() -> Option<BatteryReading> {
        let entries = fs::read_dir(POWER_SUPPLY).ok()?;
        let supplies: Vec<SupplyEntry> = entries
            .flatten()
            .map(|entry| {
                let dir = entry.path();
                SupplyEntry {
                    kind: read_attr(&dir, "type").unwrap_or_default(),
                    capacity: read_attr(&dir, "capacity").and_then(|v| v.parse().ok()),
                    status: read_attr(&dir, "status"),
                    online: read_attr(&dir, "online").map(|v| v == "1"),
                }
            })
            .collect();
        battery_from_supplies(&supplies)
    }

    /// First `Battery` supply gives the charge; any online `Mains`/`USB`
    /// adapter means plugged, otherwise the battery's own status decides.
    pub fn battery_from_supplies(supplies: &[SupplyEntry]) -> Option<BatteryReading> {
        let battery = supplies.iter().find(|s| s.kind == "Battery")?;

        let adapters: Vec<&SupplyEntry> = supplies
            .iter()
            .filter(|s| matches!(s.kind.as_str(), "Mains" | "USB"))
            .filter(|s| s.online.is_some())
            .collect();

        let plugged = if !adapters.is_empty() {
            Some(adapters.iter().any(|s| s.online == Some(true)))
        } else {
            match battery.status.as_deref() {
                Some("Charging") | Some("Full") | Some("Not charging") => Some(true),
                Some("Discharging") => Some(false),
                _ => None,
            }
        };

        Some(BatteryReading { percent: battery.capacity, plugged })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn supply(kind: &str) -> SupplyEntry {
            SupplyEntry { kind: kind.to_string(), ..Default::default() }
        }

        #[test]
        fn no_battery_supply_means_no_battery() {
            let mut ac = supply("Mains");
            ac.online = Some(true);
            assert_eq!(battery_from_supplies(&[ac]), None);
            assert_eq!(battery_from_supplies(&[]), None);
        }

        #[test]
        fn adapter_decides_plugged() {
            let mut bat = supply("Battery");
            bat.capacity = Some(64.0);
            bat.status = Some("Discharging".into());
            let mut ac = supply("Mains");
            ac.online = Some(true);

            let reading = battery_from_supplies(&[bat.clone(), ac]).unwrap();
            assert_eq!(reading.percent, Some(64.0));
            assert_eq!(reading.plugged, Some(true));

            let reading = battery_from_supplies(&[bat]).unwrap();
            assert_eq!(reading.plugged, Some(false));
        }

        #[test]
        fn unknown_status_keeps_plugged_absent() {
            let mut bat = supply("Battery");
            bat.status = Some("Unknown".into());
            let reading = battery_from_supplies(&[bat]).unwrap();
            assert_eq!(reading, BatteryReading { percent: None, plugged: None });
        }
    }
}
