//! # Sluice Cache
//!
//! An in-memory response cache keyed by request [`Fingerprint`]s.
//!
//! Every entry carries the instant it was stored and a maximum age chosen
//! from a per-prefix [`TtlPolicy`]. Expired entries are never returned: they
//! are dropped lazily on read and in bulk by a periodic sweep. Size is
//! bounded by a high-water mark, above which expired entries are purged, and
//! a hard ceiling, above which the oldest-stored entries are evicted.
//!
//! [`Fingerprint`]: sluice_types::Fingerprint

mod cache;
mod config;
mod pattern;

pub use cache::{CacheStats, ResponseCache, SweepReport};
pub use config::{CacheConfig, InvalidConfig, TtlPolicy};
pub use pattern::KeyPattern;
