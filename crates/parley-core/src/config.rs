//! Core configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the core can start with zero
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use parley_shared::constants::{
    DEFAULT_PAGE_SIZE, DEFAULT_PASSWORD_LENGTH, DEFAULT_POLL_INTERVAL_SECS, MAX_FILE_SIZE,
};

/// Core configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Directory holding the database and received media.
    /// Env: `PARLEY_DATA_DIR`
    /// Default: platform data directory, or `./parley-data` if none exists.
    pub data_dir: PathBuf,

    /// Presence poll interval.
    /// Env: `PARLEY_POLL_INTERVAL_SECS`
    /// Default: `5`
    pub poll_interval: Duration,

    /// Messages per pagination window.
    /// Env: `PARLEY_PAGE_SIZE`
    /// Default: `20`
    pub page_size: usize,

    /// Maximum archive size in bytes, both directions.
    /// Env: `PARLEY_MAX_FILE_SIZE`
    /// Default: 50 MiB
    pub max_file_size: u64,

    /// Length of the one-time archive password.
    /// Env: `PARLEY_PASSWORD_LENGTH`
    /// Default: `32`
    pub password_length: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: parley_store::default_data_dir()
                .unwrap_or_else(|_| PathBuf::from("./parley-data")),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            max_file_size: MAX_FILE_SIZE as u64,
            password_length: DEFAULT_PASSWORD_LENGTH,
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("PARLEY_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        if let Some(secs) = parse_positive::<u64>(&lookup, "PARLEY_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(size) = parse_positive(&lookup, "PARLEY_PAGE_SIZE") {
            config.page_size = size;
        }

        if let Some(max) = parse_positive(&lookup, "PARLEY_MAX_FILE_SIZE") {
            config.max_file_size = max;
        }

        if let Some(len) = parse_positive(&lookup, "PARLEY_PASSWORD_LENGTH") {
            config.password_length = len;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("parley.db")
    }

    /// Where extracted attachments are written.
    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            tracing::warn!(variable = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}
