//! Backend client factories.

use async_trait::async_trait;
use sluice_types::BoxError;
use std::future::Future;

/// Produces the backend clients held by a pool.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    /// The client handle type.
    type Client: Send + 'static;

    /// Creates a new client.
    async fn create(&self) -> Result<Self::Client, BoxError>;

    /// Tears down a client the pool no longer needs.
    fn destroy(&self, client: Self::Client) {
        drop(client);
    }
}

/// A [`ClientFactory`] backed by an async closure.
pub struct FnFactory<F> {
    create: F,
}

impl<F> FnFactory<F> {
    /// Wraps a closure returning a future that yields a client.
    pub fn new(create: F) -> Self {
        Self { create }
    }
}

impl<F> std::fmt::Debug for FnFactory<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFactory").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, C> ClientFactory for FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, BoxError>> + Send + 'static,
    C: Send + 'static,
{
    type Client = C;

    async fn create(&self) -> Result<C, BoxError> {
        (self.create)().await
    }
}
