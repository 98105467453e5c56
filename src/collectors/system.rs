use crate::collectors::{used_percent, CollectError, DiskUsage, MetricsSnapshot, MetricsSource};
use crate::filter::{filter_partitions, FilterRule, Partition};
use std::collections::{HashMap, HashSet};
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tracing::debug;

pub struct SysinfoSource {
    system: System,
}

impl SysinfoSource {
    /// Primes the CPU counters so the first `collect` after
    /// `System::MINIMUM_CPU_UPDATE_INTERVAL` reports a real usage value.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system }
    }

    pub fn host_name(&self) -> Option<String> {
        self.system
            .host_name()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SysinfoSource {
    fn collect(
        &mut self,
        hostname: &str,
        rule: &FilterRule,
    ) -> Result<MetricsSnapshot, CollectError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_disks_list();

        let cpus = self.system.cpus();
        let cpu_percent = if cpus.is_empty() {
            0.0
        } else {
            let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
            (sum / cpus.len() as f32) as f64
        };

        let memory_total = self.system.total_memory();
        if memory_total == 0 {
            return Err(CollectError::MemoryUnavailable);
        }
        let mem_percent = used_percent(self.system.used_memory(), memory_total);

        let mut candidates = Vec::new();
        let mut usage: HashMap<Partition, (u64, u64)> = HashMap::new();
        for disk in self.system.disks() {
            let partition = Partition {
                mountpoint: disk.mount_point().to_string_lossy().to_string(),
                fstype: String::from_utf8_lossy(disk.file_system()).to_string(),
            };
            if usage.contains_key(&partition) {
                continue;
            }
            usage.insert(
                partition.clone(),
                (disk.total_space(), disk.available_space()),
            );
            candidates.push(partition);
        }

        let mut seen = HashSet::new();
        let mut disks = Vec::new();
        for partition in filter_partitions(&candidates, rule) {
            if !seen.insert(partition.mountpoint.clone()) {
                debug!(mountpoint = %partition.mountpoint, "duplicate mountpoint skipped");
                continue;
            }
            let Some(&(total_bytes, available_bytes)) = usage.get(&partition) else {
                continue;
            };
            let used_bytes = total_bytes.saturating_sub(available_bytes);
            disks.push(DiskUsage {
                used_percent: used_percent(used_bytes, total_bytes),
                mountpoint: partition.mountpoint,
                fstype: partition.fstype,
                total_bytes,
                used_bytes,
            });
        }

        Ok(MetricsSnapshot {
            hostname: hostname.to_string(),
            cpu_percent,
            mem_percent,
            disks,
        })
    }
}
