//! A simulated backend for exercising a gateway without a real service.
//!
//! Clients answer after a fixed latency and fail at a configurable rate.
//! [`run_simulation`] drives a burst of fetches over a random key space and
//! reports what happened.

use crate::gateway::Gateway;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sluice_pool::ClientFactory;
use sluice_types::{BoxError, Fingerprint};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Parameters of a simulated workload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationConfig {
    /// Number of fetches issued.
    pub requests: usize,
    /// Maximum fetches in flight at once.
    pub concurrency: usize,
    /// Number of distinct request paths.
    pub key_space: usize,
    /// Backend response time.
    pub latency: Duration,
    /// Probability that a backend call fails.
    pub failure_rate: f64,
    /// RNG seed for a reproducible key sequence.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            requests: 1_000,
            concurrency: 64,
            key_space: 50,
            latency: Duration::from_millis(20),
            failure_rate: 0.0,
            seed: 42,
        }
    }
}

/// A session with the simulated backend.
///
/// Sessions are stateful and not `Clone`: each counts the requests it has
/// served over its lifetime.
#[derive(Debug)]
pub struct SimulatedClient {
    id: u32,
    latency: Duration,
    served: u64,
}

impl SimulatedClient {
    /// Returns the client's connection number.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the number of requests this session has answered.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Answers a request for `path` after the configured latency.
    pub async fn query(&mut self, path: &str, fail: bool) -> Result<String, BoxError> {
        tokio::time::sleep(self.latency).await;
        self.served += 1;
        if fail {
            return Err(format!("simulated failure for {path}").into());
        }
        Ok(format!("{path} served by connection {}", self.id))
    }
}

/// Creates [`SimulatedClient`]s.
#[derive(Debug)]
pub struct SimulatedBackend {
    latency: Duration,
    connections: AtomicU32,
}

impl SimulatedBackend {
    /// Creates a backend answering after `latency`.
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            connections: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ClientFactory for SimulatedBackend {
    type Client = SimulatedClient;

    async fn create(&self) -> Result<SimulatedClient, BoxError> {
        let id = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(connection = id, "Simulated backend connection opened");
        Ok(SimulatedClient {
            id,
            latency: self.latency,
            served: 0,
        })
    }

    fn destroy(&self, client: SimulatedClient) {
        tracing::debug!(
            connection = client.id,
            served = client.served,
            "Simulated backend connection closed"
        );
    }
}

/// Outcome of a simulated workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationReport {
    /// Fetches that returned a response.
    pub succeeded: usize,
    /// Fetches that failed.
    pub failed: usize,
    /// Failures caused by pool exhaustion.
    pub timeouts: usize,
    /// Wall-clock duration of the burst in milliseconds.
    pub elapsed_ms: u64,
}

/// Issues `config.requests` fetches against `gateway`.
pub async fn run_simulation(
    gateway: Arc<Gateway<SimulatedClient, String>>,
    config: &SimulationConfig,
) -> SimulationReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let key_space = config.key_space.max(1);
    let plan: Vec<(String, bool)> = (0..config.requests)
        .map(|_| {
            let path = format!("/items/{}", rng.gen_range(0..key_space));
            let fail = config.failure_rate > 0.0 && rng.gen_bool(config.failure_rate.min(1.0));
            (path, fail)
        })
        .collect();

    tracing::info!(
        requests = config.requests,
        concurrency = config.concurrency,
        key_space,
        "Starting simulation"
    );

    let started = Instant::now();
    let outcomes: Vec<_> = stream::iter(plan)
        .map(|(path, fail)| {
            let gateway = Arc::clone(&gateway);
            async move {
                let key = Fingerprint::request("GET", &path);
                gateway
                    .fetch(&key, move |client| {
                        async move { client.query(&path, fail).await }.boxed()
                    })
                    .await
            }
        })
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;

    let mut report = SimulationReport {
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome {
            Ok(_) => report.succeeded += 1,
            Err(e) => {
                report.failed += 1;
                if e.is_timeout() {
                    report.timeouts += 1;
                }
            }
        }
    }

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "Simulation finished"
    );
    report
}
