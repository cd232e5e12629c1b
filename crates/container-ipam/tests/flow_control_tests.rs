//! End-to-end flow control tests
//!
//! Allocation writes the container's declared limit into its assignment
//! value; the watch pipeline picks the change up and dispatches it to the
//! rate limiter.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use container_ipam::config::PipelineSettings;
use container_ipam::runtime::{ContainerDetails, StaticRuntime};
use container_ipam::shaper::RecordingRateLimiter;
use container_ipam::store::{KeyValue, Watcher};
use container_ipam::{
    Error, EventHandler, FlowControlPipeline, IpamConfig, IpamService, KvStore, MemoryStore,
    RateLimit, Result, WatchEvent,
};

// ============================================================================
// Test Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn test_config() -> IpamConfig {
    let mut config = IpamConfig::default();
    config.hostname = "node-1".to_string();
    config.allocation.settle_delay_ms = 10;
    config.pipeline.watch_retry_delay_ms = 10;
    config
}

fn runtime_with(id: &str, address: &str, pid: u32, env: &[&str]) -> Arc<StaticRuntime> {
    let runtime = Arc::new(StaticRuntime::new());
    runtime.add_container(
        id,
        vec![ip(address)],
        ContainerDetails {
            pid,
            env: env.iter().map(|e| e.to_string()).collect(),
        },
    );
    runtime
}

/// Store whose first watch dies immediately
struct FlakyStore {
    inner: Arc<MemoryStore>,
    watches: AtomicUsize,
}

struct BrokenWatcher;

#[async_trait]
impl Watcher for BrokenWatcher {
    async fn next(&mut self) -> Result<WatchEvent> {
        Err(Error::StoreUnavailable("connection reset".to_string()))
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<String> {
        self.inner.get(key).await
    }

    async fn get_children(&self, dir: &str) -> Result<Vec<KeyValue>> {
        self.inner.get_children(dir).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn create_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.inner.create_if_absent(key, value, ttl).await
    }

    async fn watch(&self, prefix: &str) -> Result<Box<dyn Watcher>> {
        if self.watches.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(Box::new(BrokenWatcher));
        }
        self.inner.watch(prefix).await
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[tokio::test]
async fn test_allocation_limit_is_enforced() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_with("web", "10.0.2.1", 4242, &["IN=100", "OUT=50"]);
    let limiter = Arc::new(RecordingRateLimiter::new());

    let service =
        IpamService::with_components(test_config(), store, runtime, limiter.clone()).unwrap();
    service
        .initialize_range(ip("10.0.2.1"), ip("10.0.2.3"))
        .await
        .unwrap();

    let pipeline = service.start().await;
    let allocation = service.allocate("10.0.2.0", None).await.unwrap();
    assert_eq!(allocation.address, ip("10.0.2.1"));

    let calls = tokio::time::timeout(WAIT, limiter.wait_for(1)).await.unwrap();
    assert_eq!(calls[0].pid, 4242);
    assert_eq!(calls[0].limit, RateLimit::new(100, 50));
    pipeline.abort();
}

#[tokio::test]
async fn test_unlimited_container_not_shaped() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_with("batch", "10.0.2.1", 7, &["IN=0", "OUT=0"]);
    let limiter = Arc::new(RecordingRateLimiter::new());

    let service =
        IpamService::with_components(test_config(), store.clone(), runtime, limiter.clone())
            .unwrap();
    service
        .initialize_range(ip("10.0.2.1"), ip("10.0.2.1"))
        .await
        .unwrap();
    let pipeline = service.start().await;
    service.allocate("10.0.2.0", None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(limiter.calls().is_empty());
    pipeline.abort();
}

#[tokio::test]
async fn test_only_own_host_and_valid_keys_dispatch() {
    let store = Arc::new(MemoryStore::new());
    let runtime = runtime_with("web", "10.0.2.5", 11, &[]);
    runtime.add_container(
        "other",
        vec![ip("10.0.2.6")],
        ContainerDetails {
            pid: 22,
            env: vec![],
        },
    );
    let limiter = Arc::new(RecordingRateLimiter::new());

    let handler = EventHandler::new("node-1", runtime, limiter.clone());
    let pipeline = FlowControlPipeline::new(
        store.clone(),
        "/skylark/networks",
        handler,
        &PipelineSettings::default(),
    )
    .start()
    .await;

    let limit = r#"{"IN":10,"OUT":10}"#;
    store
        .set("/skylark/networks/10.0.2.0/assigned/node-2/10.0.2.6", limit, None)
        .await
        .unwrap();
    store
        .set("/skylark/networks/10.0.2.0/assigned/node-1/bogus", limit, None)
        .await
        .unwrap();
    store
        .set("/skylark/networks/10.0.2.0/assigned/node-1/10.0.2.5", limit, None)
        .await
        .unwrap();

    let calls = tokio::time::timeout(WAIT, limiter.wait_for(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(limiter.calls().len(), 1);
    assert_eq!(calls[0].pid, 11);
    pipeline.abort();
}

#[tokio::test]
async fn test_watch_resubscribes_after_error() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        watches: AtomicUsize::new(0),
    });
    let runtime = runtime_with("web", "10.0.2.5", 11, &[]);
    let limiter = Arc::new(RecordingRateLimiter::new());

    let mut settings = PipelineSettings::default();
    settings.watch_retry_delay_ms = 10;
    let handler = EventHandler::new("node-1", runtime, limiter.clone());
    let pipeline = FlowControlPipeline::new(store.clone(), "/skylark/networks", handler, &settings)
        .start()
        .await;

    // Wait for the supervisor to replace the broken watch
    tokio::time::timeout(WAIT, async {
        while store.watches.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    inner
        .set(
            "/skylark/networks/10.0.2.0/assigned/node-1/10.0.2.5",
            r#"{"IN":1,"OUT":2}"#,
            None,
        )
        .await
        .unwrap();

    let calls = tokio::time::timeout(WAIT, limiter.wait_for(1)).await.unwrap();
    assert_eq!(calls[0].limit, RateLimit::new(1, 2));
    assert!(!pipeline.is_finished());
    pipeline.abort();
}
