use serde::{Deserialize, Serialize};

const WILDCARD: char = '*';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    pub mountpoint: String,
    pub fstype: String,
}

/// Mount and filesystem-type rules deciding which partitions are monitored.
///
/// Mount entries match exactly, or by prefix when they end in `*`.
/// `fstype_exclude` is compared case-insensitively.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilterRule {
    #[serde(default)]
    pub mount_include: Vec<String>,
    #[serde(default)]
    pub mount_exclude: Vec<String>,
    #[serde(default)]
    pub fstype_exclude: Vec<String>,
}

impl FilterRule {
    pub fn allows(&self, mountpoint: &str, fstype: &str) -> bool {
        if !self.mount_include.is_empty() {
            if !match_mount(&self.mount_include, mountpoint) {
                return false;
            }
        } else if match_mount(&self.mount_exclude, mountpoint) {
            return false;
        }
        !contains_fstype(&self.fstype_exclude, fstype)
    }
}

pub fn filter_partitions(candidates: &[Partition], rule: &FilterRule) -> Vec<Partition> {
    candidates
        .iter()
        .filter(|p| rule.allows(&p.mountpoint, &p.fstype))
        .cloned()
        .collect()
}

pub fn match_mount(entries: &[String], mountpoint: &str) -> bool {
    entries.iter().any(|entry| {
        if entry.is_empty() {
            return false;
        }
        match entry.strip_suffix(WILDCARD) {
            Some(prefix) => mountpoint.starts_with(prefix),
            None => entry == mountpoint,
        }
    })
}

fn contains_fstype(entries: &[String], fstype: &str) -> bool {
    if fstype.is_empty() {
        return false;
    }
    entries
        .iter()
        .any(|entry| !entry.is_empty() && entry.eq_ignore_ascii_case(fstype))
}
