//! # Sluice Pool
//!
//! A bounded pool of reusable backend client handles.
//!
//! The pool keeps between `min_size` and `max_size` handles alive. Callers
//! [`acquire`](PoolManager::acquire) a handle, use it, and
//! [`release`](PoolManager::release) it. When every handle is busy and the
//! pool is at capacity, callers queue as FIFO waiters until a handle is
//! released to them or their timeout elapses. A background reaper destroys
//! handles that have sat idle too long, never dropping below `min_size`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sluice_pool::{FnFactory, PoolConfig, PoolManager};
//!
//! # async fn run() -> Result<(), sluice_pool::PoolError> {
//! let factory = FnFactory::new(|| async { Ok::<_, sluice_types::BoxError>(String::from("client")) });
//! let pool = PoolManager::start(factory, PoolConfig::default()).await?;
//!
//! let handle = pool.acquire().await?;
//! println!("using {}", handle.client());
//! pool.release(handle)?;
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod factory;
mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use factory::{ClientFactory, FnFactory};
pub use pool::{HandleId, PoolManager, PoolStats, PooledHandle};
