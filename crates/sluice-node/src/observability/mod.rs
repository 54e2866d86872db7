//! # Observability Module
//!
//! - **Structured Logging**: `tracing` subscriber with JSON or pretty output
//! - **Prometheus Metrics**: gauges refreshed from gateway statistics
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sluice_node::observability::{init_logging, LogFormat, MetricsState};
//!
//! init_logging("info", LogFormat::Json).ok();
//!
//! let metrics = MetricsState::new();
//! println!("{}", metrics.encode().unwrap_or_default());
//! ```

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::MetricsState;
