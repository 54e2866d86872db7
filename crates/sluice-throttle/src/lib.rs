//! # Sluice Throttle
//!
//! Decides whether an event should be emitted at all. An event is identified
//! by a logical key (event type plus subject). Once emitted, the same key is
//! suppressed until its cooldown has passed. Records are capped in number,
//! oldest first out, and purged once older than every cooldown in use.
//!
//! ```
//! use sluice_throttle::{ThrottleConfig, ThrottleGuard, ThrottleKey};
//! use std::time::Duration;
//!
//! let guard = ThrottleGuard::new(ThrottleConfig::default()).unwrap();
//! let key = ThrottleKey::new("view", "product-42");
//!
//! assert!(guard.should_emit(&key, Duration::from_secs(60)));
//! assert!(!guard.should_emit(&key, Duration::from_secs(60)));
//! ```

mod config;
mod guard;
mod key;

pub use config::{InvalidConfig, ThrottleConfig};
pub use guard::{CleanupReport, ThrottleGuard, ThrottleStats};
pub use key::ThrottleKey;
