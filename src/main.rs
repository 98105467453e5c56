mod alerts;
mod collectors;
mod config;
mod filter;
mod http;
mod metrics;
mod report;
mod runner;
mod state;
mod telegram;

use axum::serve;
use clap::Parser;
use collectors::system::SysinfoSource;
use config::{parse_list, parse_window, Config};
use metrics::Metrics;
use runner::{unix_seconds, ReportSchedule, Runner};
use state::State;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use sysinfo::{System, SystemExt};
use telegram::TelegramNotifier;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostwatch")]
#[command(version)]
struct Cli {
    /// YAML configuration file; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    #[arg(long, conflicts_with = "telegram_off")]
    telegram_on: bool,
    #[arg(long, conflicts_with = "telegram_on")]
    telegram_off: bool,
    #[arg(long, env = "INTERVAL", value_parser = humantime::parse_duration)]
    interval: Option<Duration>,
    #[arg(long, env = "CPU_THRESHOLD", allow_hyphen_values = true)]
    cpu_threshold: Option<f64>,
    #[arg(long, env = "CPU_ALERT_WINDOW", value_parser = parse_window, allow_hyphen_values = true)]
    cpu_alert_window: Option<Duration>,
    #[arg(long, env = "MEM_THRESHOLD", allow_hyphen_values = true)]
    mem_threshold: Option<f64>,
    #[arg(long, env = "MEM_ALERT_WINDOW", value_parser = parse_window, allow_hyphen_values = true)]
    mem_alert_window: Option<Duration>,
    #[arg(long, env = "DISK_THRESHOLD", allow_hyphen_values = true)]
    disk_threshold: Option<f64>,
    #[arg(long, env = "DISK_ALERT_WINDOW", value_parser = parse_window, allow_hyphen_values = true)]
    disk_alert_window: Option<Duration>,
    /// Comma separated mountpoints to include (overrides exclude), `none` clears.
    #[arg(long, env = "MOUNT_INCLUDE")]
    mount_include: Option<String>,
    /// Comma separated mountpoints to exclude, `*` suffix matches a prefix.
    #[arg(long, env = "MOUNT_EXCLUDE")]
    mount_exclude: Option<String>,
    #[arg(long, env = "FSTYPE_EXCLUDE")]
    fstype_exclude: Option<String>,
    #[arg(long, env = "SYSTEM_NAME")]
    system_name: Option<String>,
    #[arg(long, env = "TELEGRAM_CHAT_ID", allow_hyphen_values = true)]
    telegram_chat_id: Option<String>,
    /// Bot token; takes precedence over the environment and the config file.
    #[arg(long)]
    telegram_token: Option<String>,
    /// Cron expression (UTC) for the full metrics report, empty disables it.
    #[arg(long, env = "TELEGRAM_SCHEDULE")]
    telegram_schedule: Option<String>,
    #[arg(long, env = "LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    let dotenv_result = dotenvy::dotenv();
    init_tracing();
    if let Err(err) = dotenv_result {
        if !err.not_found() {
            warn!(error = %err, "failed to load .env file");
        }
    }

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    apply_cli(&mut cfg, &cli);
    cfg.normalize();
    if let Err(err) = cfg.validate() {
        error!(error = %err, "invalid configuration");
        std::process::exit(1);
    }

    let cli_token = cli.telegram_token.as_deref();
    let notifier = match telegram::resolve_credentials(&cfg.telegram, cli_token) {
        Ok((token, chat_id)) => match TelegramNotifier::new(token, &chat_id) {
            Ok(notifier) => Some(notifier),
            Err(err) => {
                warn!(error = %err, "telegram disabled");
                None
            }
        },
        Err(reason) => {
            warn!(reason = %reason, "telegram disabled");
            None
        }
    };

    let source = SysinfoSource::new();
    let display_name = display_name(&cfg.system_name, source.host_name());

    info!(
        hostname = %display_name,
        interval = %humantime::format_duration(cfg.interval),
        telegram = notifier.is_some(),
        listen = cfg.listen.as_deref().unwrap_or("-"),
        "starting hostwatch"
    );

    let shared_state = Arc::new(RwLock::new(State::new(unix_seconds(SystemTime::now()))));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = cfg.listen.clone().map(|listen| {
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state);
            let addr: SocketAddr = match listen.trim().parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    });

    let collector_task = {
        let mut shutdown = shutdown_rx.clone();
        let mut schedule = if notifier.is_some() {
            ReportSchedule::from_expression(&cfg.telegram.schedule, cfg.telegram.report_on_start)
        } else {
            ReportSchedule::new(None, false)
        };
        let mut runner = Runner::new(
            source,
            display_name,
            cfg.filter.clone(),
            cfg.thresholds.clone(),
            notifier,
            shared_state.clone(),
            metrics.clone(),
        );
        let interval = cfg.interval;
        tokio::spawn(async move {
            // CPU usage needs two refreshes at least this far apart.
            let first_tick = Instant::now() + System::MINIMUM_CPU_UPDATE_INTERVAL;
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("collector loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let now = SystemTime::now();
                        let send_report = runner.has_notifier() && schedule.due(now);
                        if let Err(err) = runner.run_once(now, send_report).await {
                            error!(error = %err, "run failed");
                        }
                    }
                }
            }
        })
    };

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    let _ = collector_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(reason = "interrupt", "shutdown"),
        _ = terminate => info!(reason = "terminate", "shutdown"),
    }
}

fn apply_cli(cfg: &mut Config, cli: &Cli) {
    if cli.telegram_on {
        cfg.telegram.enabled = true;
    } else if cli.telegram_off {
        cfg.telegram.enabled = false;
    }
    if let Some(v) = cli.interval {
        cfg.interval = v;
    }
    if let Some(v) = cli.cpu_threshold {
        cfg.thresholds.cpu.threshold = v;
    }
    if let Some(v) = cli.cpu_alert_window {
        cfg.thresholds.cpu.window = v;
    }
    if let Some(v) = cli.mem_threshold {
        cfg.thresholds.memory.threshold = v;
    }
    if let Some(v) = cli.mem_alert_window {
        cfg.thresholds.memory.window = v;
    }
    if let Some(v) = cli.disk_threshold {
        cfg.thresholds.disk.threshold = v;
    }
    if let Some(v) = cli.disk_alert_window {
        cfg.thresholds.disk.window = v;
    }
    if let Some(v) = &cli.mount_include {
        cfg.filter.mount_include = parse_list(v);
    }
    if let Some(v) = &cli.mount_exclude {
        cfg.filter.mount_exclude = parse_list(v);
    }
    if let Some(v) = &cli.fstype_exclude {
        cfg.filter.fstype_exclude = parse_list(v);
    }
    if let Some(v) = &cli.system_name {
        cfg.system_name = v.clone();
    }
    if let Some(v) = &cli.telegram_chat_id {
        cfg.telegram.chat_id = Some(v.clone());
    }
    if let Some(v) = &cli.telegram_schedule {
        cfg.telegram.schedule = v.clone();
    }
    if let Some(v) = &cli.listen {
        cfg.listen = Some(v.clone()).filter(|l| !l.trim().is_empty());
    }
}

fn display_name(system_name: &str, host_name: Option<String>) -> String {
    let host = host_name.unwrap_or_else(|| "unknown".to_string());
    let system_name = system_name.trim();
    if system_name.is_empty() {
        host
    } else {
        format!("{system_name} ({host})")
    }
}
