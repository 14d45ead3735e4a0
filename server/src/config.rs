//! Configuration management for the server.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Largest batch a session commits at once.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Tunables of a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Records committed per batch, 1..=1000
    pub batch_size: usize,
    /// Retries after the first transfer attempt
    pub max_retry_attempts: u32,
    /// Backoff base; attempt n waits `base * 2^(n-1)`
    pub retry_base: Duration,
    /// Ceiling for one transfer attempt
    pub transfer_timeout: Duration,
    /// Minimum gap between two progress events
    pub progress_interval: Duration,
    /// Sets above this size are verified by sampling
    pub sampling_threshold: usize,
    pub sample_size: usize,
    /// Finished sessions kept in history
    pub history_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_retry_attempts: 3,
            retry_base: Duration::from_millis(500),
            transfer_timeout: Duration::from_millis(30_000),
            progress_interval: Duration::from_millis(100),
            sampling_threshold: 1000,
            sample_size: 200,
            history_limit: 50,
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; in-memory stores are used when unset
    pub database_url: Option<String>,
    /// Stores registered at startup
    pub store_ids: Vec<String>,
    pub sync: SyncSettings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse(&lookup, "PORT", 3000u16)?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let store_ids: Vec<String> = lookup("STORE_IDS")
            .unwrap_or_else(|| "local,remote".to_string())
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if store_ids.is_empty() {
            return Err(ConfigError::Invalid {
                key: "STORE_IDS",
                value: String::new(),
            });
        }

        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            batch_size: parse(&lookup, "SYNC_BATCH_SIZE", defaults.batch_size)?
                .clamp(1, MAX_BATCH_SIZE),
            max_retry_attempts: parse(&lookup, "SYNC_MAX_RETRY_ATTEMPTS", defaults.max_retry_attempts)?,
            retry_base: millis(&lookup, "SYNC_RETRY_BASE_MS", defaults.retry_base)?,
            transfer_timeout: millis(&lookup, "SYNC_TRANSFER_TIMEOUT_MS", defaults.transfer_timeout)?,
            progress_interval: millis(&lookup, "SYNC_PROGRESS_INTERVAL_MS", defaults.progress_interval)?,
            sampling_threshold: parse(&lookup, "SYNC_SAMPLING_THRESHOLD", defaults.sampling_threshold)?,
            sample_size: parse(&lookup, "SYNC_SAMPLE_SIZE", defaults.sample_size)?,
            history_limit: parse(&lookup, "SYNC_HISTORY_LIMIT", defaults.history_limit)?,
        };

        Ok(Self {
            host,
            port,
            database_url,
            store_ids,
            sync,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn millis<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse(lookup, key, default).map(Duration::from_millis)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}
