//! # Sluice Node
//!
//! Request-throughput optimization between application logic and a remote
//! backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                       Gateway                        │
//! ├──────────────────────────────────────────────────────┤
//! │  Deduplicator   one in-flight run per fingerprint    │
//! │  ResponseCache  TTL and size bounded responses       │
//! │  PoolManager    bounded, reusable backend clients    │
//! │  ThrottleGuard  cooldown-based event suppression     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Each component lives in its own crate and can be used alone. This crate
//! wires them together, loads their configuration from YAML and exposes
//! logging and Prometheus metrics.
//!
//! ## Modules
//!
//! - [`config`] - YAML configuration
//! - [`gateway`] - The composed fetch path
//! - [`observability`] - Structured logging and metrics
//! - [`simulate`] - A simulated backend for load experiments
//!
//! ## Example
//!
//! ```rust,no_run
//! use futures::FutureExt;
//! use sluice_node::{Gateway, SluiceConfig};
//! use sluice_pool::FnFactory;
//! use sluice_types::{BoxError, Fingerprint};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SluiceConfig::load_yaml("sluice.yaml")?;
//! let factory = FnFactory::new(|| async { Ok::<_, BoxError>(String::from("conn")) });
//! let gateway: Gateway<String, String> = Gateway::start(factory, &config).await?;
//!
//! let key = Fingerprint::request("GET", "/products/42");
//! let body = gateway
//!     .fetch(&key, |conn| async move { Ok(format!("product 42 via {conn}")) }.boxed())
//!     .await?;
//! println!("{body}");
//!
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod simulate;

pub use config::SluiceConfig;
pub use error::{ConfigError, GatewayError};
pub use gateway::{Gateway, GatewayStats};
