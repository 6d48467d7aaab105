use crate::hooks::HookPoint;
use http::{Method, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Boxed error used at the provider, hook and stream-handler boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a [`PipelineError`].
///
/// Tests and callers should match on the kind rather than on message text,
/// which is not stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed registration, header, URL or configuration
    Validation,
    /// Compression or decompression codec failure
    Encoding,
    /// Provider I/O failure
    Transport,
    /// Cancellation token fired or a deadline elapsed
    Cancellation,
    /// A `Before*` hook vetoed the operation
    HookAbort,
    /// Non-2xx status surfaced through `Response::error_for_status`
    Status,
    /// Caller-supplied stream handler failed
    Handler,
    /// Internal failure (e.g. a batch task panicked)
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Encoding => "encoding",
            Self::Transport => "transport",
            Self::Cancellation => "cancellation",
            Self::HookAbort => "hook_abort",
            Self::Status => "status",
            Self::Handler => "handler",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Compression codec failure
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CodecError {
    /// The encoder or decoder failed on the given payload
    #[error("{encoding} codec failed: {source}")]
    Io {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Decoded payload exceeded the configured size limit
    #[error("decoded {encoding} body exceeds limit of {limit} bytes")]
    TooLarge { encoding: &'static str, limit: usize },
}

/// Why an outbound request could not be assembled
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RequestError {
    /// URL failed to parse, or lacks an `http`/`https` scheme or a host
    #[error("invalid URL: {reason}")]
    InvalidUri { reason: String },

    #[error("invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    /// JSON body serialization failed
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding failed
    #[error("form encoding failed: {0}")]
    Form(#[from] serde_urlencoded::ser::Error),

    #[error("failed to build request: {0}")]
    Http(#[from] http::Error),
}

/// Errors produced by the execution pipeline.
///
/// Every variant raised on a call path carries the method and target of the
/// operation; the underlying cause is preserved as the error `source`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// Built-in hook point used where a custom point is required, or the reverse
    #[error("invalid hook point {point}: {reason}")]
    InvalidHookPoint { point: u32, reason: &'static str },

    /// A custom hook with the same name is already registered at this point
    #[error("hook '{name}' already registered at {point}")]
    DuplicateHookName { point: HookPoint, name: String },

    /// Invalid default header name in the client configuration
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid default header value or user agent in the client configuration
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// URL, header or body of a call could not be assembled
    #[error("{method} {target}: invalid request: {source}")]
    InvalidRequest {
        method: Method,
        target: String,
        #[source]
        source: RequestError,
    },

    /// Response body is not the expected JSON
    #[error("{method} {target}: failed to parse JSON body: {source}")]
    Json {
        method: Method,
        target: String,
        #[source]
        source: serde_json::Error,
    },

    /// Compression or decompression failed
    #[error("{method} {target}: {source}")]
    Encoding {
        method: Method,
        target: String,
        #[source]
        source: CodecError,
    },

    /// Provider I/O failure
    #[error("{method} {target}: transport error: {source}")]
    Transport {
        method: Method,
        target: String,
        #[source]
        source: BoxError,
    },

    /// Provider call exceeded the configured timeout
    #[error("{method} {target}: request timed out after {timeout:?}")]
    Timeout {
        method: Method,
        target: String,
        timeout: Duration,
    },

    /// Total retry deadline exceeded
    #[error("{method} {target}: operation deadline exceeded after {deadline:?}")]
    DeadlineExceeded {
        method: Method,
        target: String,
        deadline: Duration,
    },

    /// Cancellation token fired
    #[error("{method} {target}: operation cancelled")]
    Cancelled { method: Method, target: String },

    /// A `Before*` hook returned `continue = false`
    #[error("{method} {target}: aborted by {point} hook")]
    HookAborted {
        method: Method,
        target: String,
        point: HookPoint,
        #[source]
        source: Option<BoxError>,
    },

    /// Stream handler rejected a chunk
    #[error("{method} {target}: stream handler failed on chunk {chunk}: {source}")]
    Handler {
        method: Method,
        target: String,
        chunk: usize,
        #[source]
        source: BoxError,
    },

    /// Non-2xx status returned by `Response::error_for_status`
    #[error("{method} {target}: HTTP {status}: {body_preview}")]
    HttpStatus {
        method: Method,
        target: String,
        status: StatusCode,
        body_preview: String,
    },

    /// Batch task terminated without producing a result
    #[error("{method} {target}: batch task failed: {reason}")]
    TaskFailed {
        method: Method,
        target: String,
        reason: String,
    },
}

impl PipelineError {
    /// Coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidHookPoint { .. }
            | Self::DuplicateHookName { .. }
            | Self::InvalidHeaderName(_)
            | Self::InvalidHeaderValue(_)
            | Self::InvalidRequest { .. }
            | Self::Json { .. } => ErrorKind::Validation,
            Self::Encoding { .. } => ErrorKind::Encoding,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } | Self::DeadlineExceeded { .. } | Self::Cancelled { .. } => {
                ErrorKind::Cancellation
            }
            Self::HookAborted { .. } => ErrorKind::HookAbort,
            Self::Handler { .. } => ErrorKind::Handler,
            Self::HttpStatus { .. } => ErrorKind::Status,
            Self::TaskFailed { .. } => ErrorKind::Internal,
        }
    }

    /// Method and target of the failed operation, when the error was raised on a call path.
    #[must_use]
    pub fn operation(&self) -> Option<(&Method, &str)> {
        match self {
            Self::InvalidRequest { method, target, .. }
            | Self::Json { method, target, .. }
            | Self::Encoding { method, target, .. }
            | Self::Transport { method, target, .. }
            | Self::Timeout { method, target, .. }
            | Self::DeadlineExceeded { method, target, .. }
            | Self::Cancelled { method, target }
            | Self::HookAborted { method, target, .. }
            | Self::Handler { method, target, .. }
            | Self::HttpStatus { method, target, .. }
            | Self::TaskFailed { method, target, .. } => Some((method, target.as_str())),
            _ => None,
        }
    }

    /// Whether this error was caused by cancellation or a deadline.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }

    pub(crate) fn cancelled(method: &Method, target: &str) -> Self {
        Self::Cancelled {
            method: method.clone(),
            target: target.to_owned(),
        }
    }

    pub(crate) fn transport(method: &Method, target: &str, source: BoxError) -> Self {
        Self::Transport {
            method: method.clone(),
            target: target.to_owned(),
            source,
        }
    }

    pub(crate) fn invalid_request(
        method: &Method,
        target: &str,
        source: impl Into<RequestError>,
    ) -> Self {
        Self::InvalidRequest {
            method: method.clone(),
            target: target.to_owned(),
            source: source.into(),
        }
    }

    pub(crate) fn encoding(method: &Method, target: &str, source: CodecError) -> Self {
        Self::Encoding {
            method: method.clone(),
            target: target.to_owned(),
            source,
        }
    }
}
