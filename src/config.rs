use crate::alerts::{SignalThreshold, Thresholds};
use crate::filter::FilterRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_interval", with = "duration_serde")]
    pub interval: Duration,
    #[serde(default)]
    pub system_name: String,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default = "default_filter")]
    pub filter: FilterRule,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Standard five-field cron expression evaluated in UTC. Empty disables
    /// the periodic report.
    #[serde(default = "default_report_schedule")]
    pub schedule: String,
    #[serde(default = "default_report_on_start")]
    pub report_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            system_name: String::new(),
            listen: None,
            thresholds: Thresholds::default(),
            filter: default_filter(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: default_telegram_enabled(),
            bot_token_env: default_bot_token_env(),
            bot_token: None,
            chat_id: None,
            schedule: default_report_schedule(),
            report_on_start: default_report_on_start(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let mut cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Brings soft-invalid values back into range instead of refusing to start.
    pub fn normalize(&mut self) {
        if self.interval < MIN_INTERVAL {
            warn!(
                interval = %humantime::format_duration(self.interval),
                "interval too small, defaulting to 1s"
            );
            self.interval = MIN_INTERVAL;
        }
        clamp_threshold("cpu", &mut self.thresholds.cpu);
        clamp_threshold("memory", &mut self.thresholds.memory);
        clamp_threshold("disk", &mut self.thresholds.disk);

        self.system_name = self.system_name.trim().to_string();
        self.listen = self
            .listen
            .take()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        self.filter.mount_include = clean_list(std::mem::take(&mut self.filter.mount_include));
        self.filter.mount_exclude = clean_list(std::mem::take(&mut self.filter.mount_exclude));
        self.filter.fstype_exclude = clean_list(std::mem::take(&mut self.filter.fstype_exclude))
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        self.telegram.chat_id = self
            .telegram
            .chat_id
            .take()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self.telegram.schedule = self.telegram.schedule.trim().to_string();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(listen) = &self.listen {
            if SocketAddr::from_str(listen.trim()).is_err() {
                return Err(ConfigError::Validation(format!(
                    "listen must be a host:port socket address, got '{listen}'"
                )));
            }
        }
        if self.telegram.bot_token_env.trim().is_empty() {
            return Err(ConfigError::Validation(
                "telegram.bot_token_env must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn clamp_threshold(signal: &str, limit: &mut SignalThreshold) {
    let clamped = clamp_percent(limit.threshold);
    if clamped != limit.threshold {
        warn!(
            signal,
            configured = limit.threshold,
            clamped,
            "threshold outside 0..100, clamping"
        );
        limit.threshold = clamped;
    }
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Splits a comma separated list. The literal `none` stands for an empty list.
pub fn parse_list(value: &str) -> Vec<String> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parses a humantime duration. A leading `-` yields zero so a negative
/// window simply disables the debounce delay.
pub fn parse_window(value: &str) -> Result<Duration, humantime::DurationError> {
    let trimmed = value.trim();
    if let Some(rest) = trimmed.strip_prefix('-') {
        humantime::parse_duration(rest.trim())?;
        warn!(window = trimmed, "negative alert window, using 0s");
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(trimmed)
}

pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

/// Like [`duration_serde`] but negative values become zero, see [`parse_window`].
pub mod window_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        super::duration_serde::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_window(&raw).map_err(serde::de::Error::custom)
    }
}

const fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_filter() -> FilterRule {
    FilterRule {
        mount_include: Vec::new(),
        mount_exclude: parse_list("/dev*,/proc*,/sys*,/run*"),
        fstype_exclude: parse_list(
            "tmpfs,devtmpfs,overlay,proc,sysfs,devpts,cgroup,cgroup2,pstore,securityfs,\
             debugfs,tracefs,configfs,ramfs,hugetlbfs,mqueue,autofs,binfmt_misc,fusectl,efivarfs",
        ),
    }
}

const fn default_telegram_enabled() -> bool {
    true
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

fn default_report_schedule() -> String {
    "0 12 * * 0".to_string()
}

const fn default_report_on_start() -> bool {
    true
}
