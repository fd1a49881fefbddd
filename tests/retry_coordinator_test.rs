use event_courier::LogEvent;
use event_courier::reliability::{CacheConfig, CacheStore, RetryConfig, RetryCoordinator};
use event_courier::sender::{Transport, TransportConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_interval_doubles_on_failed_cycles_and_resets_on_success() {
    init_tracing();
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let temp_dir = TempDir::new().unwrap();
    let cache = open_cache(&temp_dir).await;
    cache.enqueue(&test_event("stuck")).await.unwrap();

    let coordinator = RetryCoordinator::new(
        retry_config(60, 3600),
        transport_for(&server),
        Arc::clone(&cache),
    );

    let report = coordinator.drain().await;
    assert_eq!(report.failed, 1);
    assert_eq!(
        coordinator.snapshot().current_interval,
        Duration::from_secs(120)
    );
    assert_eq!(coordinator.snapshot().consecutive_failures, 1);

    coordinator.drain().await;
    assert_eq!(
        coordinator.snapshot().current_interval,
        Duration::from_secs(240)
    );
    assert_eq!(coordinator.snapshot().consecutive_failures, 2);

    // Endpoint recovers; a fully successful cycle resets the backoff.
    server.reset().await;
    mount_status(&server, 200).await;

    let report = coordinator.drain().await;
    assert_eq!(report.sent, 1);
    assert_eq!(
        coordinator.snapshot().current_interval,
        Duration::from_secs(60)
    );
    assert_eq!(coordinator.snapshot().consecutive_failures, 0);
}

#[tokio::test]
async fn test_interval_is_capped_at_max() {
    let server = MockServer::start().await;
    mount_status(&server, 503).await;

    let temp_dir = TempDir::new().unwrap();
    let cache = open_cache(&temp_dir).await;
    cache.enqueue(&test_event("stuck")).await.unwrap();

    let coordinator =
        RetryCoordinator::new(retry_config(60, 100), transport_for(&server), cache);

    coordinator.drain().await;
    assert_eq!(
        coordinator.snapshot().current_interval,
        Duration::from_secs(100)
    );

    coordinator.drain().await;
    assert_eq!(
        coordinator.snapshot().current_interval,
        Duration::from_secs(100)
    );
}

#[tokio::test]
async fn test_empty_cache_cycle_resets_interval() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let temp_dir = TempDir::new().unwrap();
    let cache = open_cache(&temp_dir).await;
    cache.enqueue(&test_event("stuck")).await.unwrap();

    let coordinator = RetryCoordinator::new(
        retry_config(60, 3600),
        transport_for(&server),
        Arc::clone(&cache),
    );

    coordinator.drain().await;
    assert_eq!(
        coordinator.snapshot().current_interval,
        Duration::from_secs(120)
    );

    cache.clear().await.unwrap();
    let report = coordinator.drain().await;
    assert_eq!(report.total, 0);
    assert_eq!(
        coordinator.snapshot().current_interval,
        Duration::from_secs(60)
    );
}

#[tokio::test]
async fn test_manual_drain_reports_counts_and_empties_store() {
    let server = MockServer::start().await;
    mount_status(&server, 200).await;

    let temp_dir = TempDir::new().unwrap();
    let cache = open_cache(&temp_dir).await;
    for i in 0..5 {
        cache.enqueue(&test_event(&format!("event-{i}"))).await.unwrap();
    }

    let coordinator = RetryCoordinator::new(
        retry_config(60, 3600),
        transport_for(&server),
        Arc::clone(&cache),
    );

    let report = coordinator.drain().await;
    assert_eq!(report.sent, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(report.total, 5);
    assert_eq!(cache.stats().count, 0);
}

#[tokio::test]
async fn test_cycle_attempts_every_entry_despite_failures() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let temp_dir = TempDir::new().unwrap();
    let cache = open_cache(&temp_dir).await;
    for i in 0..5 {
        cache.enqueue(&test_event(&format!("event-{i}"))).await.unwrap();
    }

    let coordinator = RetryCoordinator::new(
        retry_config(60, 3600),
        transport_for(&server),
        Arc::clone(&cache),
    );

    let report = coordinator.drain().await;
    assert_eq!(report.failed, 5);
    // One POST per entry: no short-circuit after the first failure.
    assert_eq!(server.received_requests().await.unwrap().len(), 5);
    assert_eq!(cache.stats().count, 5);
}

#[tokio::test]
async fn test_manual_drain_can_leave_interval_untouched() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let temp_dir = TempDir::new().unwrap();
    let cache = open_cache(&temp_dir).await;
    cache.enqueue(&test_event("stuck")).await.unwrap();

    let mut config = retry_config(60, 3600);
    config.drain_adjusts_interval = false;
    let coordinator = RetryCoordinator::new(config, transport_for(&server), cache);

    let report = coordinator.drain().await;
    assert_eq!(report.failed, 1);
    assert_eq!(
        coordinator.snapshot().current_interval,
        Duration::from_secs(60)
    );
    assert_eq!(coordinator.snapshot().consecutive_failures, 0);
}

#[tokio::test]
async fn test_background_loop_drains_and_stops_cleanly() {
    init_tracing();
    let server = MockServer::start().await;
    mount_status(&server, 200).await;

    let temp_dir = TempDir::new().unwrap();
    let cache = open_cache(&temp_dir).await;
    cache.enqueue(&test_event("queued")).await.unwrap();

    let config = RetryConfig {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_secs(1),
        async_mode: true,
        drain_adjusts_interval: true,
    };
    let coordinator =
        RetryCoordinator::new(config, transport_for(&server), Arc::clone(&cache));

    coordinator.start().await;
    assert!(coordinator.is_running());

    // Starting again while running is a no-op.
    coordinator.start().await;

    wait_until(|| cache.stats().count == 0).await;

    coordinator.stop().await;
    assert!(!coordinator.is_running());

    // stop() is idempotent.
    coordinator.stop().await;
    assert!(!coordinator.is_running());
}

#[tokio::test]
async fn test_cooperative_mode_runs_on_caller_task() {
    let server = MockServer::start().await;
    mount_status(&server, 200).await;

    let temp_dir = TempDir::new().unwrap();
    let cache = open_cache(&temp_dir).await;
    cache.enqueue(&test_event("queued")).await.unwrap();

    let config = RetryConfig {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_secs(1),
        async_mode: false,
        drain_adjusts_interval: true,
    };
    let coordinator =
        RetryCoordinator::new(config, transport_for(&server), Arc::clone(&cache));

    coordinator.start().await;

    let runner = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.run().await })
    };

    wait_until(|| cache.stats().count == 0).await;

    coordinator.stop().await;
    tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("loop must exit after stop()")
        .unwrap();
}

/// RUST_LOG-aware logging for debugging flaky runs; safe to call repeatedly.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn mount_status(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

async fn open_cache(temp_dir: &TempDir) -> Arc<CacheStore> {
    Arc::new(
        CacheStore::open(CacheConfig {
            directory: temp_dir.path().to_path_buf(),
            max_size: 10 * 1024 * 1024,
        })
        .await
        .unwrap(),
    )
}

fn transport_for(server: &MockServer) -> Transport {
    Transport::new(TransportConfig {
        endpoint: server.uri(),
        api_key: "test-key".to_string(),
        timeout: Duration::from_secs(2),
        max_retries: 0,
        backoff_factor: 0.0,
        ..TransportConfig::default()
    })
    .unwrap()
}

fn retry_config(initial_secs: u64, max_secs: u64) -> RetryConfig {
    RetryConfig {
        initial_interval: Duration::from_secs(initial_secs),
        max_interval: Duration::from_secs(max_secs),
        async_mode: false,
        drain_adjusts_interval: true,
    }
}

fn test_event(marker: &str) -> LogEvent {
    LogEvent::new(
        "activity",
        "retry",
        "test",
        "info",
        "2026-01-01 00:00:00",
        json!({"marker": marker}),
    )
}

async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 2s");
}
