use crate::alerts::Alert;
use crate::collectors::MetricsSnapshot;
use serde::Serialize;
use std::collections::VecDeque;

const MAX_RECENT_ALERTS: usize = 50;

/// Latest cycle results shared with the HTTP exporter. Alert hysteresis
/// lives with the runner and never ends up here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub started_at_unix: i64,
    pub last_collect_timestamp_seconds: i64,
    pub cycles_total: u64,
    pub collect_errors_total: u64,
    pub last_error: Option<String>,
    pub snapshot: Option<MetricsSnapshot>,
    pub recent_alerts: VecDeque<AlertRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub raised_at_unix: i64,
    pub signal: &'static str,
    pub text: String,
}

impl State {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn record_cycle(&mut self, now_unix: i64, snapshot: MetricsSnapshot, alerts: &[Alert]) {
        self.cycles_total += 1;
        self.last_collect_timestamp_seconds = now_unix;
        self.last_error = None;
        self.snapshot = Some(snapshot);
        for alert in alerts {
            self.recent_alerts.push_back(AlertRecord {
                raised_at_unix: now_unix,
                signal: alert.signal.kind(),
                text: alert.to_string(),
            });
        }
        while self.recent_alerts.len() > MAX_RECENT_ALERTS {
            self.recent_alerts.pop_front();
        }
    }

    pub fn record_error(&mut self, error: String) {
        self.cycles_total += 1;
        self.collect_errors_total += 1;
        self.last_error = Some(error);
    }
}
