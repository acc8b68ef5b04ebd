//! Process-wide scheduler configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "TASK_SCHEDULER_";

/// Store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StoreBackendConfig {
    /// In-memory store for development/testing.
    #[default]
    InMemory,
    /// JSON snapshot + JSONL log under `path`.
    File {
        /// Directory holding the store files.
        path: PathBuf,
    },
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound applied to every request's `max_retries`.
    pub max_retries_ceiling: u32,
    /// Retries allowed when a request does not specify them.
    pub default_max_retries: u32,
    /// Orphan watchdog period; `0` disables the watchdog.
    pub watchdog_interval_ms: u64,
    /// Ceiling for exponential retry delays.
    pub max_backoff_ms: u64,
    /// Base retry delay when a request does not specify one.
    pub default_backoff_delay_ms: u64,
    /// Exponential multiplier when a request does not specify one.
    pub default_backoff_multiplier: f64,
    /// Require a payload cipher at build time.
    pub encrypt_payloads: bool,
    /// Store backend.
    pub store: StoreBackendConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries_ceiling: 10,
            default_max_retries: 3,
            watchdog_interval_ms: 60_000,
            max_backoff_ms: crate::core::retry::MAX_BACKOFF_MS,
            default_backoff_delay_ms: 30_000,
            default_backoff_multiplier: crate::core::retry::DEFAULT_BACKOFF_MULTIPLIER,
            encrypt_payloads: false,
            store: StoreBackendConfig::InMemory,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_max_retries > self.max_retries_ceiling {
            return Err(format!(
                "default_max_retries ({}) exceeds max_retries_ceiling ({})",
                self.default_max_retries, self.max_retries_ceiling
            ));
        }
        if self.max_backoff_ms == 0 {
            return Err("max_backoff_ms must be greater than 0".into());
        }
        if !self.default_backoff_multiplier.is_finite() || self.default_backoff_multiplier <= 0.0 {
            return Err("default_backoff_multiplier must be a positive number".into());
        }
        if let StoreBackendConfig::File { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err("file store path must not be empty".into());
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// Missing fields take their default values.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `TASK_SCHEDULER_*` environment variables,
    /// loading a `.env` file first if one exists.
    ///
    /// Unset variables keep their defaults. `TASK_SCHEDULER_STORE_PATH`
    /// selects the file store. A malformed `.env` file is an error.
    pub fn from_env() -> Result<Self, String> {
        dotenv_loaded(dotenvy::dotenv())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        if let Some(v) = var("MAX_RETRIES_CEILING") {
            cfg.max_retries_ceiling = parse("MAX_RETRIES_CEILING", &v)?;
        }
        if let Some(v) = var("DEFAULT_MAX_RETRIES") {
            cfg.default_max_retries = parse("DEFAULT_MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("WATCHDOG_INTERVAL_MS") {
            cfg.watchdog_interval_ms = parse("WATCHDOG_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("MAX_BACKOFF_MS") {
            cfg.max_backoff_ms = parse("MAX_BACKOFF_MS", &v)?;
        }
        if let Some(v) = var("DEFAULT_BACKOFF_DELAY_MS") {
            cfg.default_backoff_delay_ms = parse("DEFAULT_BACKOFF_DELAY_MS", &v)?;
        }
        if let Some(v) = var("DEFAULT_BACKOFF_MULTIPLIER") {
            cfg.default_backoff_multiplier = parse("DEFAULT_BACKOFF_MULTIPLIER", &v)?;
        }
        if let Some(v) = var("ENCRYPT_PAYLOADS") {
            cfg.encrypt_payloads = parse("ENCRYPT_PAYLOADS", &v)?;
        }
        if let Some(path) = var("STORE_PATH") {
            cfg.store = StoreBackendConfig::File { path: path.into() };
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse<T>(name: &str, value: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name}: invalid value `{value}`: {e}"))
}

/// A missing `.env` file is fine; anything else is reported.
fn dotenv_loaded<T>(result: Result<T, dotenvy::Error>) -> Result<(), String> {
    match result {
        Ok(_) => Ok(()),
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(format!(".env: {err}")),
    }
}
