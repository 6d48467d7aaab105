#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Extensible HTTP client execution pipeline
//!
//! Every outbound call made through a [`Client`] runs the same path:
//!
//! ```text
//! Middleware (outer → inner) → BeforeRequest hooks → request compression
//!   → Provider → AfterResponse hooks → response decompression
//!   → Middleware (inner → outer)
//! on failure: OnError hooks, then the original error is returned
//! ```
//!
//! The wire transport is an injected [`Provider`]; [`HyperProvider`] (hyper +
//! rustls, HTTPS only by default) is the production implementation.
//!
//! On top of single calls the client offers chunked streaming into a
//! [`StreamHandler`] and concurrent [`Batch`] execution with per-item results.
//!
//! # Example
//!
//! ```ignore
//! use http_pipeline::{Client, HookPoint, HyperProvider, RetryMiddleware, hooks};
//! use std::sync::Arc;
//!
//! let client = Client::builder(Arc::new(HyperProvider::new()?))
//!     .middleware(Arc::new(RetryMiddleware::default()))
//!     .hook(HookPoint::AfterResponse, hooks::timing_hook())
//!     .build()?;
//!
//! let data: MyData = client
//!     .get("https://example.com/api")
//!     .send()
//!     .await?
//!     .json()?;
//! ```

mod batch;
mod builder;
pub mod classify;
mod client;
pub mod compression;
mod config;
mod context;
mod error;
pub mod hooks;
pub mod middleware;
pub mod provider;
mod request;
mod response;
mod stream;
#[cfg(test)]
mod testing;

pub use batch::{BATCH_FAILED_ATTR, BATCH_SIZE_ATTR, BATCH_SUCCEEDED_ATTR, Batch, BatchResult};
pub use builder::ClientBuilder;
pub use classify::{ErrorCategory, ErrorClassifier, PatternClassifier};
pub use client::Client;
pub use compression::{CompressionConfig, CompressionStats, Compressor, Encoding};
pub use config::{BatchConfig, ClientConfig, DEFAULT_USER_AGENT};
pub use context::{AttrValue, Attributes, ErrorInfo, ExecutionContext, OperationKind};
pub use error::{BoxError, CodecError, ErrorKind, PipelineError, RequestError};
pub use hooks::{CUSTOM_HOOK_BASE, HookHandler, HookManager, HookPoint, HookResult, hook};
pub use middleware::{Endpoint, Middleware, MiddlewareChain, Next, RetryConfig, RetryMiddleware};
#[cfg(feature = "hyper-provider")]
pub use provider::{HyperProvider, HyperProviderConfig, TransportSecurity};
pub use provider::{ChunkStream, Provider, StreamResponse};
pub use request::{Request, RequestBody, RequestBuilder};
pub use response::{ERROR_BODY_PREVIEW_LIMIT, Response, parse_retry_after};
pub use stream::{StreamHandler, StreamOutcome, StreamSummary};
