//! # Sluice Coalesce
//!
//! Request deduplication: while an operation for a key is running, further
//! callers with the same key attach to it instead of starting their own, and
//! every caller receives the same result. Nothing is remembered once the
//! operation settles, so the next call starts fresh.

mod dedup;

pub use dedup::{DedupStats, Deduplicator};
