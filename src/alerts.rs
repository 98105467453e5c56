use crate::collectors::MetricsSnapshot;
use crate::config::window_serde;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Percent threshold plus the time a value must stay at or above it before
/// an alert fires. A threshold of zero or below disables the signal.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SignalThreshold {
    #[serde(default = "default_threshold_percent")]
    pub threshold: f64,
    #[serde(default = "default_window", with = "window_serde")]
    pub window: Duration,
}

impl SignalThreshold {
    pub fn enabled(&self) -> bool {
        self.threshold > 0.0
    }
}

impl Default for SignalThreshold {
    fn default() -> Self {
        Self {
            threshold: default_threshold_percent(),
            window: default_window(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Thresholds {
    #[serde(default)]
    pub cpu: SignalThreshold,
    #[serde(default)]
    pub memory: SignalThreshold,
    /// Applied to every monitored mount.
    #[serde(default)]
    pub disk: SignalThreshold,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Signal {
    Cpu,
    Memory,
    Disk(String),
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Cpu => "cpu",
            Signal::Memory => "memory",
            Signal::Disk(_) => "disk",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Cpu => f.write_str("CPU"),
            Signal::Memory => f.write_str("Memory"),
            Signal::Disk(mount) => write!(f, "Disk {mount}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub signal: Signal,
    pub value: f64,
    pub threshold: f64,
    pub window: Duration,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.1}% >= {:.1}% for {}",
            self.signal,
            self.value,
            self.threshold,
            humantime::format_duration(self.window)
        )
    }
}

#[derive(Debug, Clone, Default)]
struct SignalState {
    above_since: Option<SystemTime>,
    alerting: bool,
}

impl SignalState {
    /// Returns true when this reading completes the window and the alert
    /// for the current excursion has not fired yet.
    fn observe_above(&mut self, window: Duration, now: SystemTime) -> bool {
        let since = *self.above_since.get_or_insert(now);
        if self.alerting {
            return false;
        }
        let elapsed = now.duration_since(since).unwrap_or(Duration::ZERO);
        if elapsed >= window {
            self.alerting = true;
            return true;
        }
        false
    }

    fn clear(&mut self) {
        self.above_since = None;
        self.alerting = false;
    }
}

/// Hysteresis state for one monitored host. Created empty at startup and
/// mutated only by [`evaluate`].
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    cpu: SignalState,
    memory: SignalState,
    disks: HashMap<String, SignalState>,
}

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alerting(&self, signal: &Signal) -> bool {
        self.signal_state(signal).is_some_and(|s| s.alerting)
    }

    pub fn above_since(&self, signal: &Signal) -> Option<SystemTime> {
        self.signal_state(signal).and_then(|s| s.above_since)
    }

    pub fn tracked_mounts(&self) -> Vec<&str> {
        let mut mounts: Vec<&str> = self.disks.keys().map(String::as_str).collect();
        mounts.sort_unstable();
        mounts
    }

    fn signal_state(&self, signal: &Signal) -> Option<&SignalState> {
        match signal {
            Signal::Cpu => Some(&self.cpu),
            Signal::Memory => Some(&self.memory),
            Signal::Disk(mount) => self.disks.get(mount),
        }
    }
}

/// Feeds one snapshot through the debounce state machine and returns the
/// alerts that fired on this cycle, CPU first, then memory, then disks in
/// snapshot order.
pub fn evaluate(
    snapshot: &MetricsSnapshot,
    thresholds: &Thresholds,
    state: &mut AlertState,
    now: SystemTime,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if thresholds.cpu.enabled() {
        if let Some(alert) = observe(
            &mut state.cpu,
            Signal::Cpu,
            snapshot.cpu_percent,
            &thresholds.cpu,
            now,
        ) {
            alerts.push(alert);
        }
    }

    if thresholds.memory.enabled() {
        if let Some(alert) = observe(
            &mut state.memory,
            Signal::Memory,
            snapshot.mem_percent,
            &thresholds.memory,
            now,
        ) {
            alerts.push(alert);
        }
    }

    if thresholds.disk.enabled() {
        let limit = &thresholds.disk;
        for disk in &snapshot.disks {
            if disk.used_percent >= limit.threshold {
                let entry = state.disks.entry(disk.mountpoint.clone()).or_default();
                if entry.observe_above(limit.window, now) {
                    alerts.push(Alert {
                        signal: Signal::Disk(disk.mountpoint.clone()),
                        value: disk.used_percent,
                        threshold: limit.threshold,
                        window: limit.window,
                    });
                }
            } else {
                state.disks.remove(&disk.mountpoint);
            }
        }

        let present: HashSet<&str> = snapshot
            .disks
            .iter()
            .map(|d| d.mountpoint.as_str())
            .collect();
        state.disks.retain(|mount, _| present.contains(mount.as_str()));
    }

    alerts
}

fn observe(
    state: &mut SignalState,
    signal: Signal,
    value: f64,
    limit: &SignalThreshold,
    now: SystemTime,
) -> Option<Alert> {
    if value < limit.threshold || value.is_nan() {
        state.clear();
        return None;
    }
    state.observe_above(limit.window, now).then(|| Alert {
        signal,
        value,
        threshold: limit.threshold,
        window: limit.window,
    })
}

const fn default_threshold_percent() -> f64 {
    90.0
}

const fn default_window() -> Duration {
    Duration::from_secs(5 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::DiskUsage;
    use std::time::UNIX_EPOCH;

    const MINUTE: Duration = Duration::from_secs(60);

    fn at(minutes: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000) + MINUTE * minutes as u32
    }

    fn limit(threshold: f64, window: Duration) -> SignalThreshold {
        SignalThreshold { threshold, window }
    }

    fn disabled() -> SignalThreshold {
        limit(0.0, Duration::ZERO)
    }

    fn cpu_only(threshold: f64, window: Duration) -> Thresholds {
        Thresholds {
            cpu: limit(threshold, window),
            memory: disabled(),
            disk: disabled(),
        }
    }

    fn disk_only(threshold: f64, window: Duration) -> Thresholds {
        Thresholds {
            cpu: disabled(),
            memory: disabled(),
            disk: limit(threshold, window),
        }
    }

    fn snapshot(cpu: f64, mem: f64, disks: &[(&str, f64)]) -> MetricsSnapshot {
        MetricsSnapshot {
            hostname: "host".to_string(),
            cpu_percent: cpu,
            mem_percent: mem,
            disks: disks
                .iter()
                .map(|(mount, pct)| DiskUsage {
                    mountpoint: mount.to_string(),
                    fstype: "ext4".to_string(),
                    used_percent: *pct,
                    total_bytes: 100,
                    used_bytes: *pct as u64,
                })
                .collect(),
        }
    }

    #[test]
    fn cpu_alert_fires_once_after_window_and_resets() {
        let mut state = AlertState::new();
        let cfg = cpu_only(80.0, 5 * MINUTE);
        let busy = snapshot(90.0, 0.0, &[]);

        assert!(evaluate(&busy, &cfg, &mut state, at(0)).is_empty());
        assert_eq!(state.above_since(&Signal::Cpu), Some(at(0)));

        let alerts = evaluate(&busy, &cfg, &mut state, at(5));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].to_string(), "CPU 90.0% >= 80.0% for 5m");
        assert!(state.is_alerting(&Signal::Cpu));

        assert!(evaluate(&busy, &cfg, &mut state, at(6)).is_empty());

        let idle = snapshot(10.0, 0.0, &[]);
        assert!(evaluate(&idle, &cfg, &mut state, at(7)).is_empty());
        assert!(!state.is_alerting(&Signal::Cpu));
        assert_eq!(state.above_since(&Signal::Cpu), None);
    }

    #[test]
    fn memory_alert_after_window() {
        let mut state = AlertState::new();
        let cfg = Thresholds {
            cpu: disabled(),
            memory: limit(70.0, 2 * MINUTE),
            disk: disabled(),
        };
        let snap = snapshot(0.0, 80.0, &[]);

        assert!(evaluate(&snap, &cfg, &mut state, at(0)).is_empty());
        let alerts = evaluate(&snap, &cfg, &mut state, at(2));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].signal, Signal::Memory);
        assert_eq!(alerts[0].to_string(), "Memory 80.0% >= 70.0% for 2m");
    }

    #[test]
    fn single_fire_while_window_not_elapsed() {
        let mut state = AlertState::new();
        let cfg = cpu_only(80.0, 10 * MINUTE);
        let busy = snapshot(85.0, 0.0, &[]);

        for minute in 0..10 {
            assert!(evaluate(&busy, &cfg, &mut state, at(minute)).is_empty());
        }
        assert_eq!(evaluate(&busy, &cfg, &mut state, at(10)).len(), 1);
        for minute in 11..30 {
            assert!(evaluate(&busy, &cfg, &mut state, at(minute)).is_empty());
        }
    }

    #[test]
    fn reset_and_refire_needs_fresh_window() {
        let mut state = AlertState::new();
        let cfg = cpu_only(80.0, 5 * MINUTE);
        let busy = snapshot(95.0, 0.0, &[]);
        let idle = snapshot(20.0, 0.0, &[]);

        evaluate(&busy, &cfg, &mut state, at(0));
        assert_eq!(evaluate(&busy, &cfg, &mut state, at(5)).len(), 1);
        assert!(evaluate(&idle, &cfg, &mut state, at(6)).is_empty());

        assert!(evaluate(&busy, &cfg, &mut state, at(7)).is_empty());
        assert!(evaluate(&busy, &cfg, &mut state, at(11)).is_empty());
        assert_eq!(evaluate(&busy, &cfg, &mut state, at(12)).len(), 1);
    }

    #[test]
    fn value_equal_to_threshold_counts_as_above() {
        let mut state = AlertState::new();
        let cfg = cpu_only(80.0, Duration::ZERO);
        let alerts = evaluate(&snapshot(80.0, 0.0, &[]), &cfg, &mut state, at(0));
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn zero_window_alerts_on_first_reading_only() {
        let mut state = AlertState::new();
        let cfg = cpu_only(50.0, Duration::ZERO);
        let busy = snapshot(60.0, 0.0, &[]);
        let alerts = evaluate(&busy, &cfg, &mut state, at(0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].to_string(), "CPU 60.0% >= 50.0% for 0s");
        assert!(evaluate(&busy, &cfg, &mut state, at(0)).is_empty());
    }

    #[test]
    fn disabled_signals_leave_state_untouched() {
        let mut state = AlertState::new();
        let cfg = Thresholds {
            cpu: disabled(),
            memory: limit(-5.0, Duration::ZERO),
            disk: disabled(),
        };
        let snap = snapshot(100.0, 100.0, &[("/", 100.0)]);
        assert!(evaluate(&snap, &cfg, &mut state, at(0)).is_empty());
        assert_eq!(state.above_since(&Signal::Cpu), None);
        assert_eq!(state.above_since(&Signal::Memory), None);
        assert!(state.tracked_mounts().is_empty());
    }

    #[test]
    fn sub_threshold_snapshots_never_alert_and_clear_excursions() {
        let mut state = AlertState::new();
        let cfg = Thresholds {
            cpu: limit(80.0, 5 * MINUTE),
            memory: limit(80.0, 5 * MINUTE),
            disk: limit(80.0, 5 * MINUTE),
        };
        evaluate(
            &snapshot(90.0, 90.0, &[("/", 90.0)]),
            &cfg,
            &mut state,
            at(0),
        );
        assert!(state.above_since(&Signal::Memory).is_some());

        let calm = snapshot(10.0, 20.0, &[("/", 30.0)]);
        for minute in 1..20 {
            assert!(evaluate(&calm, &cfg, &mut state, at(minute)).is_empty());
        }
        assert!(!state.is_alerting(&Signal::Cpu));
        assert!(!state.is_alerting(&Signal::Memory));
        assert_eq!(state.above_since(&Signal::Cpu), None);
        assert!(state.tracked_mounts().is_empty());
    }

    #[test]
    fn disk_alert_and_prune_removed_mount() {
        let mut state = AlertState::new();
        let cfg = disk_only(80.0, 3 * MINUTE);
        let full = snapshot(0.0, 0.0, &[("/", 85.0)]);

        assert!(evaluate(&full, &cfg, &mut state, at(0)).is_empty());
        let alerts = evaluate(&full, &cfg, &mut state, at(3));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].to_string(), "Disk / 85.0% >= 80.0% for 3m");
        assert_eq!(state.tracked_mounts(), vec!["/"]);

        let gone = snapshot(0.0, 0.0, &[("/home", 10.0)]);
        assert!(evaluate(&gone, &cfg, &mut state, at(4)).is_empty());
        let root = Signal::Disk("/".to_string());
        assert!(!state.is_alerting(&root));
        assert_eq!(state.above_since(&root), None);
        assert!(state.tracked_mounts().is_empty());
    }

    #[test]
    fn disk_drop_below_clears_mount() {
        let mut state = AlertState::new();
        let cfg = disk_only(80.0, 3 * MINUTE);
        evaluate(&snapshot(0.0, 0.0, &[("/", 85.0)]), &cfg, &mut state, at(0));
        assert_eq!(
            evaluate(&snapshot(0.0, 0.0, &[("/", 85.0)]), &cfg, &mut state, at(3)).len(),
            1
        );
        assert!(evaluate(&snapshot(0.0, 0.0, &[("/", 10.0)]), &cfg, &mut state, at(4)).is_empty());
        assert!(state.tracked_mounts().is_empty());
    }

    #[test]
    fn reappearing_mount_starts_a_new_window() {
        let mut state = AlertState::new();
        let cfg = disk_only(80.0, 3 * MINUTE);
        let usb = snapshot(0.0, 0.0, &[("/media/usb", 99.0)]);

        evaluate(&usb, &cfg, &mut state, at(0));
        evaluate(&snapshot(0.0, 0.0, &[]), &cfg, &mut state, at(1));
        assert!(evaluate(&usb, &cfg, &mut state, at(3)).is_empty());
        assert_eq!(
            state.above_since(&Signal::Disk("/media/usb".to_string())),
            Some(at(3))
        );
        assert_eq!(evaluate(&usb, &cfg, &mut state, at(6)).len(), 1);
    }

    #[test]
    fn alerts_are_ordered_cpu_memory_then_disks() {
        let mut state = AlertState::new();
        let cfg = Thresholds {
            cpu: limit(50.0, Duration::ZERO),
            memory: limit(50.0, Duration::ZERO),
            disk: limit(50.0, Duration::ZERO),
        };
        let snap = snapshot(60.0, 70.0, &[("/var", 80.0), ("/", 90.0), ("/home", 10.0)]);
        let signals: Vec<Signal> = evaluate(&snap, &cfg, &mut state, at(0))
            .into_iter()
            .map(|a| a.signal)
            .collect();
        assert_eq!(
            signals,
            vec![
                Signal::Cpu,
                Signal::Memory,
                Signal::Disk("/var".to_string()),
                Signal::Disk("/".to_string()),
            ]
        );
    }

    #[test]
    fn values_above_hundred_are_normal_excursions() {
        let mut state = AlertState::new();
        let cfg = disk_only(95.0, Duration::ZERO);
        let alerts = evaluate(
            &snapshot(0.0, 0.0, &[("/weird", 104.2)]),
            &cfg,
            &mut state,
            at(0),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].value, 104.2);
    }

    #[test]
    fn clock_going_backwards_counts_as_no_elapsed_time() {
        let mut state = AlertState::new();
        let cfg = cpu_only(80.0, MINUTE);
        let busy = snapshot(90.0, 0.0, &[]);
        evaluate(&busy, &cfg, &mut state, at(10));
        assert!(evaluate(&busy, &cfg, &mut state, at(5)).is_empty());
        assert_eq!(evaluate(&busy, &cfg, &mut state, at(11)).len(), 1);
    }

    #[test]
    fn empty_snapshot_with_fresh_state_is_quiet() {
        let mut state = AlertState::new();
        let alerts = evaluate(
            &MetricsSnapshot::default(),
            &Thresholds::default(),
            &mut state,
            at(0),
        );
        assert!(alerts.is_empty());
    }
}
