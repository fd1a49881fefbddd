pub mod config;
pub mod payload;

pub use config::{Config, ConfigError};
pub use payload::{Timestamp, build_event, normalize_timestamp};

use crate::domain::LogEvent;
use crate::reliability::{CacheError, CacheStore, DrainReport, RetryCoordinator};
use crate::sender::{DeliveryOutcome, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a `send_log` call was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Sent on the caller's own execution path; the final outcome is known.
    Completed(DeliveryOutcome),
    /// Handed off to a spawned task; the caller observes no result. Failures
    /// surface only through cache state and stats.
    Deferred,
}

/// Cache introspection for callers; all figures are point-in-time.
#[derive(Debug, Clone)]
pub struct CacheStatsReport {
    pub enabled: bool,
    pub count: u64,
    pub size_mb: f64,
    pub max_size_mb: f64,
    pub usage_percent: f64,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RetryStatsReport {
    pub enabled: bool,
    pub running: bool,
    pub current_interval: Duration,
    pub max_interval: Duration,
    pub failures: u32,
    pub async_mode: bool,
}

/// Client for delivering structured event records to a collection endpoint.
///
/// Failed deliveries land in a size-bounded disk cache which a background
/// coordinator drains on an adaptive interval. Nothing here is fatal to the
/// owning process: delivery failures are values, cache trouble degrades to
/// `enabled: false` in [`EventLogger::cache_stats`].
pub struct EventLogger {
    config: Config,
    transport: Transport,
    cache: Option<Arc<CacheStore>>,
    coordinator: Option<Arc<RetryCoordinator>>,
}

impl EventLogger {
    /// Validates `config`, builds the transport, opens the cache store and
    /// starts the retry coordinator when configured.
    ///
    /// A cache directory that cannot be created or read degrades to a
    /// disabled cache with a logged warning; it never fails construction.
    pub async fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let transport = Transport::new(config.transport_config())
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        let cache = if config.enable_cache {
            match CacheStore::open(config.cache_config()).await {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!(error = %e, "cache directory unavailable; running without local cache");
                    None
                }
            }
        } else {
            None
        };

        let coordinator = cache.as_ref().map(|store| {
            RetryCoordinator::new(config.retry_config(), transport.clone(), Arc::clone(store))
        });

        if config.auto_retry_enabled
            && let Some(coordinator) = &coordinator
        {
            coordinator.start().await;
        }

        info!(endpoint = %transport.endpoint(), "event logger ready");
        Ok(Self {
            config,
            transport,
            cache,
            coordinator,
        })
    }

    /// Builds the logger entirely from `EVENT_COURIER_*` environment variables.
    pub async fn from_env() -> Result<Self, ConfigError> {
        Self::new(Config::from_env()?).await
    }

    /// Delivers one event.
    ///
    /// In synchronous dispatch mode this blocks the caller until the
    /// transport reports a final outcome, caching the event on any failure.
    /// In asynchronous mode the send (and the cache-on-failure step) run on
    /// a spawned task and `Dispatch::Deferred` returns immediately.
    pub async fn send_log(&self, event: LogEvent) -> Dispatch {
        if self.config.async_dispatch {
            let transport = self.transport.clone();
            let cache = self.cache.clone();
            tokio::spawn(async move {
                deliver_and_cache(&transport, cache.as_deref(), &event).await;
            });
            Dispatch::Deferred
        } else {
            Dispatch::Completed(
                deliver_and_cache(&self.transport, self.cache.as_deref(), &event).await,
            )
        }
    }

    /// Synchronously drains the cache once, regardless of whether the
    /// background loop is running.
    pub async fn retry_cached_logs(&self) -> DrainReport {
        match &self.coordinator {
            Some(coordinator) => coordinator.drain().await,
            None => {
                debug!("local cache disabled; nothing to drain");
                DrainReport::default()
            }
        }
    }

    /// Drives the drain loop on the caller's task until [`EventLogger::close`].
    /// Only needed when `auto_retry_async` is off.
    pub async fn run_retry_loop(&self) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.run().await;
        }
    }

    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            match cache.clear().await {
                Ok(removed) => info!(removed, "cleared retry cache"),
                Err(e) => warn!(error = %e, "failed to clear retry cache"),
            }
        }
    }

    pub fn cache_stats(&self) -> CacheStatsReport {
        match &self.cache {
            Some(cache) => {
                let stats = cache.stats();
                CacheStatsReport {
                    enabled: true,
                    count: stats.count,
                    size_mb: round2(stats.size_bytes as f64 / 1024.0 / 1024.0),
                    max_size_mb: round2(stats.max_size_bytes as f64 / 1024.0 / 1024.0),
                    usage_percent: round2(stats.usage_percent),
                    cache_dir: Some(cache.directory().to_path_buf()),
                }
            }
            None => CacheStatsReport {
                enabled: false,
                count: 0,
                size_mb: 0.0,
                max_size_mb: 0.0,
                usage_percent: 0.0,
                cache_dir: None,
            },
        }
    }

    pub fn retry_stats(&self) -> RetryStatsReport {
        match &self.coordinator {
            Some(coordinator) => {
                let snapshot = coordinator.snapshot();
                RetryStatsReport {
                    enabled: self.config.auto_retry_enabled,
                    running: snapshot.running,
                    current_interval: snapshot.current_interval,
                    max_interval: snapshot.max_interval,
                    failures: snapshot.consecutive_failures,
                    async_mode: snapshot.async_mode,
                }
            }
            None => RetryStatsReport {
                enabled: false,
                running: false,
                current_interval: Duration::ZERO,
                max_interval: Duration::ZERO,
                failures: 0,
                async_mode: false,
            },
        }
    }

    /// Stops the retry coordinator; no background activity survives this
    /// call. Idempotent.
    pub async fn close(&self) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.stop().await;
        }
    }
}

/// The shared tail of both dispatch modes: one transport attempt sequence,
/// then cache-on-failure. Permanent rejections are cached too; the remote
/// condition may later change (e.g. credential rotation).
async fn deliver_and_cache(
    transport: &Transport,
    cache: Option<&CacheStore>,
    event: &LogEvent,
) -> DeliveryOutcome {
    let outcome = transport.send(event).await;

    if outcome.is_failure() {
        match cache {
            Some(cache) => match cache.enqueue(event).await {
                Ok(id) => debug!(%id, "event cached for later retry"),
                Err(CacheError::EntryTooLarge { size, max_size }) => {
                    warn!(size, max_size, "event lost: too large for the retry cache");
                }
                Err(e) => warn!(error = %e, "event lost: failed to write retry cache"),
            },
            None => debug!("delivery failed and local cache is disabled; event dropped"),
        }
    }

    outcome
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
