pub mod system;

use crate::filter::FilterRule;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub hostname: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub disks: Vec<DiskUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub mountpoint: String,
    pub fstype: String,
    pub used_percent: f64,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("memory statistics unavailable")]
    MemoryUnavailable,
}

/// Produces one snapshot per evaluation cycle. Only partitions allowed by
/// `rule` appear in the returned disk list.
pub trait MetricsSource {
    fn collect(&mut self, hostname: &str, rule: &FilterRule)
        -> Result<MetricsSnapshot, CollectError>;
}

pub fn used_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64) * 100.0
    }
}
