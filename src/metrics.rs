use crate::state::State;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub cpu_usage_percent: Gauge,
    pub memory_usage_percent: Gauge,
    pub disk_used_bytes: GaugeVec,
    pub disk_total_bytes: GaugeVec,
    pub disk_usage_percent: GaugeVec,
    pub disk_count: Gauge,
    pub uptime_seconds: Gauge,
    pub last_collect_timestamp_seconds: Gauge,
    pub scrape_count_total: Counter,
    pub collect_errors_total: CounterVec,
    pub alerts_fired_total: CounterVec,
    pub notifications_sent_total: CounterVec,
    pub notification_errors_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let cpu_usage_percent = Gauge::with_opts(opts!(
            "hostwatch_cpu_usage_percent",
            "Average CPU usage across cores in percent"
        ))?;
        let memory_usage_percent = Gauge::with_opts(opts!(
            "hostwatch_memory_usage_percent",
            "Used memory in percent of total"
        ))?;
        let disk_used_bytes = GaugeVec::new(
            opts!("hostwatch_disk_used_bytes", "Disk used bytes by mount"),
            &["mount"],
        )?;
        let disk_total_bytes = GaugeVec::new(
            opts!("hostwatch_disk_total_bytes", "Disk total bytes by mount"),
            &["mount"],
        )?;
        let disk_usage_percent = GaugeVec::new(
            opts!(
                "hostwatch_disk_usage_percent",
                "Disk usage in percent by mount"
            ),
            &["mount"],
        )?;
        let disk_count = Gauge::with_opts(opts!(
            "hostwatch_disk_count",
            "Number of monitored mounts"
        ))?;
        let uptime_seconds = Gauge::with_opts(opts!(
            "hostwatch_uptime_seconds",
            "Seconds since the monitor started"
        ))?;
        let last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "hostwatch_last_collect_timestamp_seconds",
            "Unix time of the last successful collection"
        ))?;
        let scrape_count_total = Counter::with_opts(opts!(
            "hostwatch_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let collect_errors_total = CounterVec::new(
            opts!(
                "hostwatch_collect_errors_total",
                "Failed metric collections by source"
            ),
            &["source"],
        )?;
        let alerts_fired_total = CounterVec::new(
            opts!(
                "hostwatch_alerts_fired_total",
                "Threshold alerts fired by signal kind"
            ),
            &["signal"],
        )?;
        let notifications_sent_total = CounterVec::new(
            opts!(
                "hostwatch_notifications_sent_total",
                "Telegram messages delivered by kind"
            ),
            &["kind"],
        )?;
        let notification_errors_total = CounterVec::new(
            opts!(
                "hostwatch_notification_errors_total",
                "Telegram messages that failed to send by kind"
            ),
            &["kind"],
        )?;

        register(&registry, &cpu_usage_percent)?;
        register(&registry, &memory_usage_percent)?;
        register(&registry, &disk_used_bytes)?;
        register(&registry, &disk_total_bytes)?;
        register(&registry, &disk_usage_percent)?;
        register(&registry, &disk_count)?;
        register(&registry, &uptime_seconds)?;
        register(&registry, &last_collect_timestamp_seconds)?;
        register(&registry, &scrape_count_total)?;
        register(&registry, &collect_errors_total)?;
        register(&registry, &alerts_fired_total)?;
        register(&registry, &notifications_sent_total)?;
        register(&registry, &notification_errors_total)?;

        Ok(Arc::new(Self {
            registry,
            cpu_usage_percent,
            memory_usage_percent,
            disk_used_bytes,
            disk_total_bytes,
            disk_usage_percent,
            disk_count,
            uptime_seconds,
            last_collect_timestamp_seconds,
            scrape_count_total,
            collect_errors_total,
            alerts_fired_total,
            notifications_sent_total,
            notification_errors_total,
        }))
    }

    pub fn update_from_state(&self, state: &State) {
        self.uptime_seconds
            .set(now_unix().saturating_sub(state.started_at_unix).max(0) as f64);
        self.last_collect_timestamp_seconds
            .set(state.last_collect_timestamp_seconds as f64);

        let Some(snapshot) = state.snapshot.as_ref() else {
            return;
        };
        self.cpu_usage_percent.set(snapshot.cpu_percent);
        self.memory_usage_percent.set(snapshot.mem_percent);

        // Mounts that disappeared must not keep their last value.
        self.disk_used_bytes.reset();
        self.disk_total_bytes.reset();
        self.disk_usage_percent.reset();
        for d in &snapshot.disks {
            self.disk_used_bytes
                .with_label_values(&[&d.mountpoint])
                .set(d.used_bytes as f64);
            self.disk_total_bytes
                .with_label_values(&[&d.mountpoint])
                .set(d.total_bytes as f64);
            self.disk_usage_percent
                .with_label_values(&[&d.mountpoint])
                .set(d.used_percent);
        }
        self.disk_count.set(snapshot.disks.len() as f64);
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, source: &str) {
        self.collect_errors_total.with_label_values(&[source]).inc();
    }

    pub fn inc_alert_fired(&self, signal: &str) {
        self.alerts_fired_total.with_label_values(&[signal]).inc();
    }

    pub fn inc_notification(&self, kind: &str, delivered: bool) {
        if delivered {
            self.notifications_sent_total.with_label_values(&[kind]).inc();
        } else {
            self.notification_errors_total
                .with_label_values(&[kind])
                .inc();
        }
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
