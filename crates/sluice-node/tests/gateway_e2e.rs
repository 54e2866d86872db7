//! Gateway end-to-end tests.
//!
//! Drive the composed fetch path with a counting backend and check how the
//! layers interact: coalescing in front of the cache, the cache in front of
//! the pool, and failures passing through without being stored.

use futures::FutureExt;
use sluice_node::observability::MetricsState;
use sluice_node::{Gateway, GatewayError, SluiceConfig};
use sluice_pool::{FnFactory, PoolError};
use sluice_types::{BoxError, Fingerprint};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Counts backend calls and tracks how many run at once.
#[derive(Default)]
struct Backend {
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Backend {
    async fn call(&self, path: &str, latency: Duration) -> Result<String, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        sleep(latency).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if path.contains("broken") {
            return Err(format!("{path} is broken").into());
        }
        Ok(format!("body of {path}"))
    }
}

type TestGateway = Arc<Gateway<Arc<Backend>, String>>;

async fn gateway(yaml: &str) -> (TestGateway, Arc<Backend>) {
    let config = SluiceConfig::from_yaml_str(yaml).unwrap();
    let backend = Arc::new(Backend::default());
    let shared = Arc::clone(&backend);
    let factory = FnFactory::new(move || {
        let backend = Arc::clone(&shared);
        async move { Ok::<_, BoxError>(backend) }
    });
    let gateway = Gateway::start(factory, &config).await.unwrap();
    (Arc::new(gateway), backend)
}

async fn get(
    gateway: &Gateway<Arc<Backend>, String>,
    path: &str,
    latency: Duration,
) -> Result<String, GatewayError> {
    let key = Fingerprint::request("GET", path);
    let path = path.to_string();
    gateway
        .fetch(&key, move |backend| {
            async move { backend.call(&path, latency).await }.boxed()
        })
        .await
}

/// A stateful backend session that cannot be cloned.
#[derive(Debug)]
struct Session {
    id: u32,
    busy: bool,
    served: Vec<String>,
}

impl Session {
    async fn serve(&mut self, path: &str) -> Result<String, BoxError> {
        assert!(!self.busy, "session {} shared by two callers", self.id);
        self.busy = true;
        sleep(Duration::from_millis(10)).await;
        self.busy = false;
        self.served.push(path.to_string());
        Ok(format!("{path} via session {}", self.id))
    }
}

#[tokio::test(start_paused = true)]
async fn sessions_are_exclusive_and_keep_state() {
    let config = SluiceConfig::from_yaml_str("pool:\n  min_size: 1\n  max_size: 2\n").unwrap();
    let next_id = Arc::new(AtomicU32::new(0));
    let factory = FnFactory::new(move || {
        let id = next_id.fetch_add(1, Ordering::SeqCst);
        async move {
            Ok::<_, BoxError>(Session {
                id,
                busy: false,
                served: Vec::new(),
            })
        }
    });
    let gateway: Arc<Gateway<Session, String>> =
        Arc::new(Gateway::start(factory, &config).await.unwrap());

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                let path = format!("/orders/{i}");
                let key = Fingerprint::request("GET", &path);
                gateway
                    .fetch(&key, move |session| {
                        async move { session.serve(&path).await }.boxed()
                    })
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stats = gateway.stats().pool;
    assert_eq!(stats.created, 2);
    assert_eq!(stats.in_use, 0);

    // Each session came back idle, carrying the requests it served
    let first = gateway.pool().acquire().await.unwrap();
    let second = gateway.pool().acquire().await.unwrap();
    let (a, b) = (first.client(), second.client());
    assert_ne!(a.id, b.id);
    assert!(!a.busy && !b.busy);
    assert_eq!(a.served.len() + b.served.len(), 10);

    gateway.pool().release(first).unwrap();
    gateway.pool().release(second).unwrap();
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetches_hit_backend_once() {
    let (gateway, backend) = gateway("").await;

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                get(&gateway, "/products/1?b=2&a=1", Duration::from_millis(20)).await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(
            task.await.unwrap().unwrap(),
            "body of /products/1?b=2&a=1"
        );
    }

    // Same request with reordered query is served from cache
    let cached = get(&gateway, "/products/1?a=1&b=2", Duration::from_millis(20))
        .await
        .unwrap();
    assert_eq!(cached, "body of /products/1?b=2&a=1");

    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

    let stats = gateway.stats();
    assert_eq!(stats.dedup.executions, 2);
    assert_eq!(stats.dedup.coalesced, 19);
    assert_eq!(stats.cache.hits, 1);
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failures_shared_and_never_cached() {
    let (gateway, _) = gateway("").await;

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { get(&gateway, "/broken", Duration::from_millis(10)).await })
        })
        .collect();

    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::Operation(_)));
        assert!(err.to_string().contains("/broken is broken"));
    }
    assert!(gateway.cache().is_empty());

    // The next call runs again
    let _ = get(&gateway, "/broken", Duration::from_millis(10)).await;
    let stats = gateway.stats();
    assert_eq!(stats.dedup.executions, 2);
    assert_eq!(stats.pool.in_use, 0);
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pool_bounds_backend_concurrency() {
    let (gateway, backend) = gateway("pool:\n  min_size: 0\n  max_size: 2\n  acquire_timeout_ms: 10000\n").await;

    let tasks: Vec<_> = (0..12)
        .map(|i| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                get(&gateway, &format!("/items/{i}"), Duration::from_millis(15)).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stats = gateway.stats();
    assert_eq!(stats.pool.created, 2);
    assert_eq!(stats.pool.total, 2);
    assert_eq!(stats.cache.entries, 12);

    assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_pool_surfaces_timeout() {
    let (gateway, _) = gateway("pool:\n  min_size: 1\n  max_size: 1\n  acquire_timeout_ms: 50\n").await;

    let slow = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { get(&gateway, "/slow", Duration::from_millis(200)).await })
    };
    while gateway.stats().pool.in_use == 0 {
        tokio::task::yield_now().await;
    }

    let err = get(&gateway, "/other", Duration::from_millis(1))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, GatewayError::Pool(PoolError::Timeout { .. })));

    assert!(slow.await.unwrap().is_ok());
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn invalidation_forces_refetch() {
    let (gateway, backend) = gateway("").await;
    let latency = Duration::from_millis(1);

    get(&gateway, "/products/1", latency).await.unwrap();
    get(&gateway, "/products/2", latency).await.unwrap();
    get(&gateway, "/users/1", latency).await.unwrap();

    assert_eq!(gateway.invalidate("GET /products/*"), 2);

    get(&gateway, "/products/1", latency).await.unwrap();
    get(&gateway, "/users/1", latency).await.unwrap();

    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn prefix_ttl_from_config() {
    let (gateway, _) = gateway("cache:\n  prefix_ttls:\n    \"GET /stock\": 100\n").await;
    let latency = Duration::from_millis(1);

    get(&gateway, "/stock/1", latency).await.unwrap();
    get(&gateway, "/catalog/1", latency).await.unwrap();
    sleep(Duration::from_millis(150)).await;
    get(&gateway, "/stock/1", latency).await.unwrap();
    get(&gateway, "/catalog/1", latency).await.unwrap();

    let stats = gateway.stats();
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.expired, 1);
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_fetches() {
    let (gateway, _) = gateway("").await;
    gateway.shutdown().await;
    // A second shutdown is a no-op
    gateway.shutdown().await;
    assert!(gateway.pool().is_closed());

    let err = get(&gateway, "/anything", Duration::from_millis(1))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Pool(PoolError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn throttle_and_metrics_through_gateway() {
    let (gateway, _) = gateway("").await;

    assert!(gateway.should_emit("view:42", Duration::from_secs(1)));
    assert!(!gateway.should_emit("view:42", Duration::from_secs(1)));
    get(&gateway, "/products/42", Duration::from_millis(1))
        .await
        .unwrap();

    let metrics = MetricsState::new();
    metrics.update(&gateway.stats());
    let encoded = metrics.encode().unwrap();

    assert!(encoded.contains(r#"sluice_throttle_decisions{kind="suppressed"} 1"#));
    assert!(encoded.contains(r#"sluice_cache_lookups{kind="miss"} 1"#));
    assert!(encoded.contains("sluice_cache_entries 1"));
    gateway.shutdown().await;
}
