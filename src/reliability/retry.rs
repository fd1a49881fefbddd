use super::cache::CacheStore;
use crate::sender::Transport;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Wake interval after a fully successful (or empty) cycle.
    pub initial_interval: Duration,
    /// Cap for the doubling interval.
    pub max_interval: Duration,
    /// When true, `start()` spawns the drain loop on its own task. When
    /// false, the caller drives the same loop by awaiting [`RetryCoordinator::run`].
    pub async_mode: bool,
    /// Whether a manual drain also updates the adaptive interval state, the
    /// same way automatic cycles do.
    pub drain_adjusts_interval: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(3600),
            async_mode: true,
            drain_adjusts_interval: true,
        }
    }
}

/// Outcome of one drain cycle over a scan snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
}

/// Point-in-time view of the coordinator for introspection.
#[derive(Debug, Clone)]
pub struct RetrySnapshot {
    pub running: bool,
    pub current_interval: Duration,
    pub max_interval: Duration,
    pub consecutive_failures: u32,
    pub async_mode: bool,
}

#[derive(Debug)]
struct BackoffState {
    current_interval: Duration,
    consecutive_failures: u32,
}

/// Background scheduler that periodically drains the cache through the
/// transport, doubling its wake interval on any-failure cycles and resetting
/// it on all-success (or empty) cycles.
pub struct RetryCoordinator {
    config: RetryConfig,
    transport: Transport,
    cache: Arc<CacheStore>,
    backoff: RwLock<BackoffState>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetryCoordinator {
    pub fn new(config: RetryConfig, transport: Transport, cache: Arc<CacheStore>) -> Arc<Self> {
        let backoff = BackoffState {
            current_interval: config.initial_interval,
            consecutive_failures: 0,
        };
        Arc::new(Self {
            config,
            transport,
            cache,
            backoff: RwLock::new(backoff),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
        })
    }

    /// Transitions to `Running`; a no-op when already running.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("retry coordinator already running");
            return;
        }

        let token = CancellationToken::new();
        *self.cancel.lock().await = token.clone();

        if self.config.async_mode {
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move { this.drain_loop(token).await });
            *self.handle.lock().await = Some(handle);
            info!(
                interval = ?self.config.initial_interval,
                "automatic retry loop started"
            );
        } else {
            info!("retry coordinator armed; drive it by awaiting run()");
        }
    }

    /// Runs the drain loop on the caller's own task until `stop()`.
    /// `start()` spawns this internally when `async_mode` is on.
    pub async fn run(&self) {
        let token = self.cancel.lock().await.clone();
        self.drain_loop(token).await;
    }

    /// Idempotent. Cancels the loop and, when it runs on a spawned task,
    /// awaits its termination before returning, so no background activity
    /// survives this call.
    pub async fn stop(&self) {
        self.cancel.lock().await.cancel();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "retry loop task terminated abnormally");
            }
            info!("retry coordinator stopped");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// One wait-then-flush cycle, repeated until cancelled. The wait is
    /// interruptible so `stop()` cuts it short within the select granularity.
    async fn drain_loop(&self, token: CancellationToken) {
        self.running.store(true, Ordering::SeqCst);
        loop {
            let wait = self.backoff.read().current_interval;
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }
            self.flush_cycle(true).await;
        }
        self.running.store(false, Ordering::SeqCst);
        debug!("retry loop exited");
    }

    /// Manual drain: same flush logic as automatic cycles, callable
    /// regardless of running state. Interval adjustment follows
    /// `drain_adjusts_interval`.
    pub async fn drain(&self) -> DrainReport {
        self.flush_cycle(self.config.drain_adjusts_interval).await
    }

    /// Attempts every entry in one scan snapshot; no short-circuit on
    /// failure, so one bad entry cannot starve the rest of the cycle.
    async fn flush_cycle(&self, adjust: bool) -> DrainReport {
        let entries = match self.cache.scan().await {
            Ok(entries) => entries,
            Err(e) => {
                // Disk trouble is not a send failure; leave the interval alone.
                warn!(error = %e, "cache scan failed; skipping drain cycle");
                return DrainReport::default();
            }
        };

        let total = entries.len() as u64;
        let mut report = DrainReport {
            total,
            ..DrainReport::default()
        };

        for entry in &entries {
            if self.transport.send(&entry.payload).await.is_success() {
                match self.cache.remove(entry).await {
                    Ok(_) => report.sent += 1,
                    Err(e) => {
                        warn!(id = %entry.id, error = %e, "failed to remove resent entry");
                        report.sent += 1;
                    }
                }
            } else {
                report.failed += 1;
            }
        }

        if adjust {
            self.adjust_interval(report.failed);
        }
        if total > 0 {
            info!(
                sent = report.sent,
                failed = report.failed,
                total,
                "drained retry cache"
            );
        }
        report
    }

    fn adjust_interval(&self, failed: u64) {
        let mut state = self.backoff.write();
        if failed > 0 {
            state.consecutive_failures += 1;
            state.current_interval = (state.current_interval * 2).min(self.config.max_interval);
            warn!(
                next_interval = ?state.current_interval,
                failures = state.consecutive_failures,
                "retry cycle had failures; backing off"
            );
        } else {
            state.current_interval = self.config.initial_interval;
            state.consecutive_failures = 0;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RetrySnapshot {
        let state = self.backoff.read();
        RetrySnapshot {
            running: self.is_running(),
            current_interval: state.current_interval,
            max_interval: self.config.max_interval,
            consecutive_failures: state.consecutive_failures,
            async_mode: self.config.async_mode,
        }
    }
}
