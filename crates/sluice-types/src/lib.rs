//! Common types used throughout `sluice`.
//!
//! This crate provides the small shared vocabulary of the Sluice
//! throughput layer: the injectable [`Clock`], request [`Fingerprint`]s
//! used as cache and deduplication keys, and [`BackgroundTask`], the owned
//! periodic task that drives reaping and sweeping.

mod clock;
mod fingerprint;
mod task;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use fingerprint::Fingerprint;
pub use task::BackgroundTask;

/// Boxed error type returned by caller-supplied collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
