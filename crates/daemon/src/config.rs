// Daemon Configuration (environment)

use anyhow::{Context, Result};
use jobq_core::application::QueueConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "~/.jobq/queue.db";

pub const ENV_DB_PATH: &str = "JOBQ_DB_PATH";
pub const ENV_SWEEP_INTERVAL_MS: &str = "JOBQ_SWEEP_INTERVAL_MS";
pub const ENV_DEFAULT_WORK_TIMEOUT_MS: &str = "JOBQ_DEFAULT_WORK_TIMEOUT_MS";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "JOBQ_SHUTDOWN_TIMEOUT_MS";
pub const ENV_LOG_FORMAT: &str = "JOBQ_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub log_format: LogFormat,
    pub queue: QueueConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup(ENV_DB_PATH).unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = PathBuf::from(shellexpand::tilde(&db_path).into_owned());

        let log_format = match lookup(ENV_LOG_FORMAT).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let mut queue = QueueConfig::default();
        if let Some(ms) = parse_millis(&lookup, ENV_SWEEP_INTERVAL_MS)? {
            anyhow::ensure!(ms > 0, "{} must be positive", ENV_SWEEP_INTERVAL_MS);
            queue.sweep_interval = Duration::from_millis(ms as u64);
        }
        if let Some(ms) = parse_millis(&lookup, ENV_DEFAULT_WORK_TIMEOUT_MS)? {
            anyhow::ensure!(ms > 0, "{} must be positive", ENV_DEFAULT_WORK_TIMEOUT_MS);
            queue.default_work_timeout = Some(ms);
        }
        if let Some(ms) = parse_millis(&lookup, ENV_SHUTDOWN_TIMEOUT_MS)? {
            anyhow::ensure!(ms >= 0, "{} must not be negative", ENV_SHUTDOWN_TIMEOUT_MS);
            queue.shutdown_timeout = Duration::from_millis(ms as u64);
        }

        Ok(Self {
            db_path,
            log_format,
            queue,
        })
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<i64>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<i64>()
                .with_context(|| format!("{} is not a number of milliseconds: {:?}", key, raw))
        })
        .transpose()
}
