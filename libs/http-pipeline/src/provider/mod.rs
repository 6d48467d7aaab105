//! Transport providers.
//!
//! The pipeline never touches sockets itself: every call ends in a
//! [`Provider`], which owns connection management, TLS and HTTP version
//! negotiation.

#[cfg(feature = "hyper-provider")]
mod hyper_provider;

#[cfg(feature = "hyper-provider")]
pub use hyper_provider::{HyperProvider, HyperProviderConfig, TransportSecurity};

use crate::error::BoxError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, StatusCode};

/// Ordered body chunks of a streamed response
pub type ChunkStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Head of a streamed response plus its body chunks
pub struct StreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub chunks: ChunkStream,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Wire-level HTTP transport consumed by the client.
///
/// `send` returns `Ok` for every HTTP status; `Err` is reserved for I/O level
/// failures. Implementations must be safe to call concurrently.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Perform one buffered exchange.
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError>;

    /// Send the request and return as soon as the response head arrives.
    async fn open_stream(&self, request: http::Request<Bytes>) -> Result<StreamResponse, BoxError>;

    /// Release pooled resources. Calls made after `close` may fail.
    async fn close(&self) {}
}
