use crate::alerts::{evaluate, Alert, AlertState, Thresholds};
use crate::collectors::{CollectError, MetricsSource};
use crate::filter::FilterRule;
use crate::metrics::Metrics;
use crate::report::{format_alert_html, format_metrics_html};
use crate::state::State;
use crate::telegram::TelegramNotifier;
use chrono::{DateTime, Utc};
use croner::Cron;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One monitoring pipeline for one host: collect, log, report, evaluate,
/// notify, publish.
pub struct Runner<S> {
    source: S,
    display_name: String,
    filter: FilterRule,
    thresholds: Thresholds,
    alert_state: AlertState,
    notifier: Option<TelegramNotifier>,
    shared_state: Arc<RwLock<State>>,
    metrics: Arc<Metrics>,
}

impl<S: MetricsSource> Runner<S> {
    pub fn new(
        source: S,
        display_name: String,
        filter: FilterRule,
        thresholds: Thresholds,
        notifier: Option<TelegramNotifier>,
        shared_state: Arc<RwLock<State>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            display_name,
            filter,
            thresholds,
            alert_state: AlertState::new(),
            notifier,
            shared_state,
            metrics,
        }
    }

    pub fn has_notifier(&self) -> bool {
        self.notifier.is_some()
    }

    pub async fn run_once(
        &mut self,
        now: SystemTime,
        send_report: bool,
    ) -> Result<Vec<Alert>, CollectError> {
        let snapshot = match self.source.collect(&self.display_name, &self.filter) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.metrics.inc_collect_error("system");
                self.shared_state.write().await.record_error(err.to_string());
                return Err(err);
            }
        };

        info!(
            hostname = %snapshot.hostname,
            cpu_percent = snapshot.cpu_percent,
            mem_percent = snapshot.mem_percent,
            disks = ?snapshot.disks,
            "system metrics"
        );

        if send_report {
            if let Some(notifier) = &self.notifier {
                let delivered = match notifier.send_html(&format_metrics_html(&snapshot)).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(error = %err, "telegram metrics send failed");
                        false
                    }
                };
                self.metrics.inc_notification("report", delivered);
            }
        }

        let alerts = evaluate(&snapshot, &self.thresholds, &mut self.alert_state, now);
        if !alerts.is_empty() {
            let texts: Vec<String> = alerts.iter().map(Alert::to_string).collect();
            warn!(hostname = %snapshot.hostname, alerts = ?texts, "alerts triggered");
            for alert in &alerts {
                self.metrics.inc_alert_fired(alert.signal.kind());
            }
            if let Some(notifier) = &self.notifier {
                let text = format_alert_html(&snapshot.hostname, &alerts);
                let delivered = match notifier.send_html(&text).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(error = %err, "telegram alert send failed");
                        false
                    }
                };
                self.metrics.inc_notification("alert", delivered);
            }
        }

        let mut guard = self.shared_state.write().await;
        guard.record_cycle(unix_seconds(now), snapshot, &alerts);
        self.metrics.update_from_state(&guard);
        Ok(alerts)
    }
}

/// Decides when the full metrics report is forwarded to Telegram: once at
/// startup if requested, then at every cron occurrence in UTC.
pub struct ReportSchedule {
    cron: Option<Cron>,
    next_at: Option<DateTime<Utc>>,
    send_on_start: bool,
    started: bool,
}

impl ReportSchedule {
    pub fn new(cron: Option<Cron>, send_on_start: bool) -> Self {
        Self {
            cron,
            next_at: None,
            send_on_start,
            started: false,
        }
    }

    /// Parses a five-field cron expression. An empty or invalid expression
    /// only disables the periodic report.
    pub fn from_expression(expression: &str, send_on_start: bool) -> Self {
        let expression = expression.trim();
        if expression.is_empty() {
            warn!("telegram schedule disabled: empty schedule");
            return Self::new(None, send_on_start);
        }
        match Cron::new(expression).parse() {
            Ok(cron) => Self::new(Some(cron), send_on_start),
            Err(err) => {
                warn!(schedule = expression, error = %err, "telegram schedule invalid");
                Self::new(None, send_on_start)
            }
        }
    }

    pub fn next_at(&self) -> Option<DateTime<Utc>> {
        self.next_at
    }

    pub fn due(&mut self, now: SystemTime) -> bool {
        let now = DateTime::<Utc>::from(now);
        if !self.started {
            self.started = true;
            self.next_at = self.next_after(&now);
            return self.send_on_start;
        }
        match self.next_at {
            Some(next_at) if now >= next_at => {
                self.next_at = self.next_after(&now);
                true
            }
            _ => false,
        }
    }

    fn next_after(&self, now: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let cron = self.cron.as_ref()?;
        match cron.find_next_occurrence(now, false) {
            Ok(next) => Some(next),
            Err(err) => {
                warn!(error = %err, "no upcoming telegram schedule occurrence");
                None
            }
        }
    }
}

pub fn unix_seconds(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
