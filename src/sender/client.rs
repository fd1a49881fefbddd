use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Connection settings for the collection endpoint.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Per-request timeout; every individual HTTP attempt is bounded by this.
    pub timeout: Duration,
    /// Immediate re-attempts after the first POST, so `max_retries + 1` attempts total.
    pub max_retries: u32,
    /// Inter-attempt sleep is `backoff_factor * 2^(attempt - 1)` seconds.
    pub backoff_factor: f64,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9600/v1/events".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_factor: 0.5,
            user_agent: concat!("event-courier/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP transport for one event's delivery attempt sequence.
///
/// Cheap to clone; the inner `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct Transport {
    pub(super) client: Client,
    pub(super) endpoint: Url,
    pub(super) config: TransportConfig,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let endpoint: Url = config.endpoint.parse().map_err(|e| {
            TransportError::InvalidConfiguration(format!(
                "Invalid endpoint URL '{}': {e}",
                config.endpoint
            ))
        })?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                TransportError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}
