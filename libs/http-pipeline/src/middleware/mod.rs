//! Onion-style middleware around the provider call.
//!
//! Each [`Middleware`] receives the request, the operation context and a
//! [`Next`] bound to the rest of the chain. The request leg runs in
//! registration order and the response leg in reverse.

mod retry;

pub use retry::{
    IDEMPOTENCY_KEY_HEADER, RETRY_ATTEMPT_HEADER, RETRY_ATTEMPTS_ATTR, RetryConfig,
    RetryMiddleware, is_idempotent_method,
};

use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Request/response interceptor
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle one request.
    ///
    /// Call `next.run(..)` to continue down the chain, possibly several times,
    /// or return without calling it to short-circuit.
    async fn handle(
        &self,
        request: Request,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<Response, PipelineError>;

    /// Name used in logs and introspection
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Innermost stage of the chain
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(
        &self,
        request: Request,
        ctx: &mut ExecutionContext,
    ) -> Result<Response, PipelineError>;
}

/// Remaining chain handed to a middleware.
///
/// `Copy`, so a middleware may run the rest of the chain more than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    #[must_use]
    pub fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { chain, endpoint }
    }

    /// Run the rest of the chain.
    ///
    /// # Errors
    /// Propagates whatever the remaining middleware or the endpoint return.
    pub async fn run(
        self,
        request: Request,
        ctx: &mut ExecutionContext,
    ) -> Result<Response, PipelineError> {
        match self.chain.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    chain: rest,
                    endpoint: self.endpoint,
                };
                current.handle(request, ctx, next).await
            }
            None => self.endpoint.call(request, ctx).await,
        }
    }
}

/// Ordered, runtime-extensible list of middleware
#[derive(Default)]
pub struct MiddlewareChain {
    layers: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `middleware`; it becomes the innermost layer so far.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        tracing::debug!(name = middleware.name(), "middleware added");
        self.layers.write().push(middleware);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.read().is_empty()
    }

    /// Middleware names, outermost first
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.layers
            .read()
            .iter()
            .map(|m| m.name().to_owned())
            .collect()
    }

    /// Run `request` through every middleware and finally `endpoint`.
    ///
    /// Works on a snapshot, so middleware added during the call only affects
    /// later calls.
    ///
    /// # Errors
    /// Propagates the first error not handled by a middleware.
    pub async fn process(
        &self,
        request: Request,
        ctx: &mut ExecutionContext,
        endpoint: &dyn Endpoint,
    ) -> Result<Response, PipelineError> {
        let snapshot: Vec<Arc<dyn Middleware>> = self.layers.read().clone();
        Next::new(&snapshot, endpoint).run(request, ctx).await
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("layers", &self.names())
            .finish()
    }
}
