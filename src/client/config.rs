use crate::reliability::{CacheConfig, RetryConfig};
use crate::sender::TransportConfig;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Environment error: {0}")]
    EnvError(String),
}

/// Immutable configuration for an [`crate::client::EventLogger`].
///
/// Resolved once at construction, either explicitly or from `EVENT_COURIER_*`
/// environment variables, and passed by reference to every component.
#[derive(Debug, Clone)]
pub struct Config {
    /// Collection endpoint URL. Required.
    pub endpoint: String,
    /// Bearer token for the `Authorization` header. Required.
    pub api_key: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Immediate re-attempts per send, on top of the first POST.
    pub max_retries: u32,
    /// Inter-attempt sleep is `backoff_factor * 2^(attempt - 1)` seconds.
    pub backoff_factor: f64,
    /// Persist events that failed delivery for later retry.
    pub enable_cache: bool,
    /// Cache directory; `$HOME/.event_courier_cache` when unset.
    pub cache_dir: Option<PathBuf>,
    /// Size bound for the cache, in megabytes.
    pub cache_max_size_mb: f64,
    /// Hand each send off to its own task instead of blocking the caller.
    pub async_dispatch: bool,
    /// Run the background cache drain loop.
    pub auto_retry_enabled: bool,
    /// Drain interval after an all-success cycle, in seconds.
    pub auto_retry_interval_secs: u64,
    /// Cap for the failure-doubled drain interval, in seconds.
    pub auto_retry_max_interval_secs: u64,
    /// Spawn the drain loop on its own task; when false the caller drives it.
    pub auto_retry_async: bool,
    /// Whether manual drains update the adaptive interval like automatic
    /// cycles do.
    pub drain_adjusts_interval: bool,
}

impl Config {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout_secs: 10,
            max_retries: 3,
            backoff_factor: 0.5,
            enable_cache: true,
            cache_dir: None,
            cache_max_size_mb: 30.0,
            async_dispatch: true,
            auto_retry_enabled: true,
            auto_retry_interval_secs: 60,
            auto_retry_max_interval_secs: 3600,
            auto_retry_async: true,
            drain_adjusts_interval: true,
        }
    }

    /// Builds a configuration entirely from `EVENT_COURIER_*` environment
    /// variables. `EVENT_COURIER_ENDPOINT` and `EVENT_COURIER_API_KEY` are
    /// required; every other variable overrides its default when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = std::env::var("EVENT_COURIER_ENDPOINT").map_err(|_| {
            ConfigError::EnvError(
                "EVENT_COURIER_ENDPOINT is required (or pass endpoint explicitly)".to_string(),
            )
        })?;
        let api_key = std::env::var("EVENT_COURIER_API_KEY").map_err(|_| {
            ConfigError::EnvError(
                "EVENT_COURIER_API_KEY is required (or pass api_key explicitly)".to_string(),
            )
        })?;

        let mut config = Config::new(endpoint, api_key);
        load_env_var("EVENT_COURIER_TIMEOUT_SECS", &mut config.timeout_secs)?;
        load_env_var("EVENT_COURIER_MAX_RETRIES", &mut config.max_retries)?;
        load_env_var("EVENT_COURIER_BACKOFF_FACTOR", &mut config.backoff_factor)?;
        load_env_var("EVENT_COURIER_ENABLE_CACHE", &mut config.enable_cache)?;
        load_env_path_opt("EVENT_COURIER_CACHE_DIR", &mut config.cache_dir);
        load_env_var(
            "EVENT_COURIER_CACHE_MAX_SIZE_MB",
            &mut config.cache_max_size_mb,
        )?;
        load_env_var("EVENT_COURIER_ASYNC_DISPATCH", &mut config.async_dispatch)?;
        load_env_var("EVENT_COURIER_AUTO_RETRY", &mut config.auto_retry_enabled)?;
        load_env_var(
            "EVENT_COURIER_AUTO_RETRY_INTERVAL_SECS",
            &mut config.auto_retry_interval_secs,
        )?;
        load_env_var(
            "EVENT_COURIER_AUTO_RETRY_MAX_INTERVAL_SECS",
            &mut config.auto_retry_max_interval_secs,
        )?;
        load_env_var("EVENT_COURIER_AUTO_RETRY_ASYNC", &mut config.auto_retry_async)?;
        load_env_var(
            "EVENT_COURIER_DRAIN_ADJUSTS_INTERVAL",
            &mut config.drain_adjusts_interval,
        )?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {e}", self.endpoint))
        })?;

        if self.api_key.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "API key must not be empty".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "Backoff factor must be a non-negative number, got {}",
                self.backoff_factor
            )));
        }

        if self.enable_cache && self.cache_max_size_mb <= 0.0 {
            return Err(ConfigError::InvalidConfig(
                "Cache size bound must be greater than 0".to_string(),
            ));
        }

        if self.auto_retry_enabled {
            if self.auto_retry_interval_secs == 0 {
                return Err(ConfigError::InvalidConfig(
                    "Auto retry interval must be greater than 0".to_string(),
                ));
            }
            if self.auto_retry_max_interval_secs < self.auto_retry_interval_secs {
                return Err(ConfigError::InvalidConfig(format!(
                    "Auto retry max interval ({}) must be at least the initial interval ({})",
                    self.auto_retry_max_interval_secs, self.auto_retry_interval_secs
                )));
            }
        }

        Ok(())
    }

    pub(crate) fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            backoff_factor: self.backoff_factor,
            ..TransportConfig::default()
        }
    }

    pub(crate) fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            directory: self
                .cache_dir
                .clone()
                .unwrap_or_else(default_cache_dir),
            max_size: (self.cache_max_size_mb * 1024.0 * 1024.0) as u64,
        }
    }

    pub(crate) fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_interval: Duration::from_secs(self.auto_retry_interval_secs),
            max_interval: Duration::from_secs(self.auto_retry_max_interval_secs),
            async_mode: self.auto_retry_async,
            drain_adjusts_interval: self.drain_adjusts_interval,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".event_courier_cache")
}

/// Loads and parses an environment variable, keeping the default when unset.
fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

fn load_env_path_opt(name: &str, target: &mut Option<PathBuf>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(PathBuf::from(value));
    }
}
