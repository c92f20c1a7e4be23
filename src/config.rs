//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::engine::reply::DEFAULT_REPLY_RATE;
use crate::engine::warmup::DEFAULT_BOUNCE_THRESHOLD;
use crate::error::ConfigError;
use crate::events::DEFAULT_EVENT_BUFFER;
use crate::model::WorkingHours;
use crate::scheduler::{DEFAULT_MISFIRE_GRACE, DEFAULT_RESET_CRON, ScheduleSettings, Trigger};
use crate::transport::mailbox::DEFAULT_MAIL_TIMEOUT;

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct WarmupConfig {
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub http_port: u16,
    /// Reply admission probability, clamped to `[0, 1]`.
    pub reply_rate: f64,
    pub bounce_threshold: f64,
    /// Working-hours window given to accounts created without one.
    pub working_hours: WorkingHours,
    pub warmup_interval: Duration,
    pub reply_interval: Duration,
    pub reset_cron: String,
    pub misfire_grace: Duration,
    pub event_buffer: usize,
    pub mail_timeout: Duration,
    pub auto_start: bool,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/warmup.db"),
            log_dir: PathBuf::from("./data/logs"),
            http_port: 8080,
            reply_rate: DEFAULT_REPLY_RATE,
            bounce_threshold: DEFAULT_BOUNCE_THRESHOLD,
            working_hours: WorkingHours::default(),
            warmup_interval: Duration::from_secs(60),
            reply_interval: Duration::from_secs(300),
            reset_cron: DEFAULT_RESET_CRON.to_string(),
            misfire_grace: DEFAULT_MISFIRE_GRACE,
            event_buffer: DEFAULT_EVENT_BUFFER,
            mail_timeout: DEFAULT_MAIL_TIMEOUT,
            auto_start: true,
        }
    }
}

impl WarmupConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset keys take defaults;
    /// unparseable numbers fall back to defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let number = |key: &str, default: f64| -> f64 {
            match lookup(key) {
                Some(raw) => raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or_else(|| {
                    warn!(key, value = %raw, "Invalid number, using default");
                    default
                }),
                None => default,
            }
        };
        let secs = |key: &str, default: Duration| -> Duration {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .unwrap_or_else(|_| {
                        warn!(key, value = %raw, "Invalid duration, using default");
                        default
                    }),
                None => default,
            }
        };

        let http_port = match lookup("WARMUP_HTTP_PORT") {
            Some(raw) => raw.trim().parse::<u16>().unwrap_or_else(|_| {
                warn!(key = "WARMUP_HTTP_PORT", value = %raw, "Invalid port, using default");
                defaults.http_port
            }),
            None => defaults.http_port,
        };

        let event_buffer = match lookup("EVENT_BUFFER") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or_else(|| {
                    warn!(key = "EVENT_BUFFER", value = %raw, "Invalid buffer size, using default");
                    defaults.event_buffer
                }),
            None => defaults.event_buffer,
        };

        let auto_start = match lookup("AUTO_START") {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    warn!(key = "AUTO_START", value = %raw, "Invalid flag, using default");
                    defaults.auto_start
                }
            },
            None => defaults.auto_start,
        };

        let start = lookup("WORK_START").unwrap_or_else(|| defaults.working_hours.start_str());
        let end = lookup("WORK_END").unwrap_or_else(|| defaults.working_hours.end_str());
        let working_hours =
            WorkingHours::parse(start.trim(), end.trim()).map_err(|message| ConfigError::InvalidValue {
                key: "WORK_START/WORK_END".to_string(),
                message,
            })?;

        let reset_cron = lookup("DAILY_RESET_CRON").unwrap_or(defaults.reset_cron);
        Trigger::cron(reset_cron.trim()).map_err(|e| ConfigError::InvalidValue {
            key: "DAILY_RESET_CRON".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            db_path: lookup("WARMUP_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            log_dir: lookup("WARMUP_LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
            http_port,
            reply_rate: number("REPLY_RATE", defaults.reply_rate).clamp(0.0, 1.0),
            bounce_threshold: number("BOUNCE_THRESHOLD", defaults.bounce_threshold),
            working_hours,
            warmup_interval: secs("WARMUP_INTERVAL_SECS", defaults.warmup_interval),
            reply_interval: secs("REPLY_INTERVAL_SECS", defaults.reply_interval),
            reset_cron: reset_cron.trim().to_string(),
            misfire_grace: secs("MISFIRE_GRACE_SECS", defaults.misfire_grace),
            event_buffer,
            mail_timeout: secs("MAIL_TIMEOUT_SECS", defaults.mail_timeout),
            auto_start,
        })
    }

    /// Cadences for the scheduler's standard jobs.
    pub fn schedule(&self) -> Result<ScheduleSettings, ConfigError> {
        let mut settings = ScheduleSettings::new(&self.reset_cron).map_err(|e| ConfigError::InvalidValue {
            key: "DAILY_RESET_CRON".to_string(),
            message: e.to_string(),
        })?;
        settings.warmup_every = self.warmup_interval;
        settings.reply_every = self.reply_interval;
        settings.misfire_grace = self.misfire_grace;
        Ok(settings)
    }
}
