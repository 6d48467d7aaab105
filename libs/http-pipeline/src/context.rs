//! Per-operation execution context shared by hooks and middleware.

use crate::classify::ErrorCategory;
use crate::error::{ErrorKind, PipelineError};
use bytes::Bytes;
use http::{Method, StatusCode};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What kind of pipeline entry point produced the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OperationKind {
    /// Single buffered request
    Request,
    /// Chunked streaming transfer
    Stream,
    /// Whole batch (per-item calls get their own `Request` contexts)
    Batch,
}

/// Value stored in [`Attributes`]
#[derive(Clone)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bytes(Bytes),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl AttrValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Downcast an opaque value
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Bytes> for AttrValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

/// Ordered attribute map with ASCII case-insensitive keys.
///
/// Keys are stored lowercased. Re-inserting an existing key replaces the value
/// in place, so iteration order is first-insertion order.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value; returns the previous value for the key.
    pub fn insert(&mut self, key: &str, value: impl Into<AttrValue>) -> Option<AttrValue> {
        let value = value.into();
        if let Some(slot) = self.position(key) {
            return Some(std::mem::replace(&mut self.entries[slot].1, value));
        }
        self.entries.push((key.to_ascii_lowercase(), value));
        None
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }
}

/// Summary of the failure recorded on a context before `OnError` dispatch
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub message: String,
}

/// Telemetry and control surface for one pipeline operation.
///
/// Created when the call starts and handed by `&mut` to every hook and
/// middleware on the path, so changes made by one hook are visible to the
/// hooks that run after it.
#[derive(Debug)]
pub struct ExecutionContext {
    kind: OperationKind,
    method: Method,
    target: String,
    attributes: Attributes,
    started_at: Instant,
    duration: Option<Duration>,
    status: Option<StatusCode>,
    error: Option<ErrorInfo>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(kind: OperationKind, method: Method, target: impl Into<String>) -> Self {
        Self::with_cancellation(kind, method, target, CancellationToken::new())
    }

    #[must_use]
    pub fn with_cancellation(
        kind: OperationKind,
        method: Method,
        target: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kind,
            method,
            target: target.into(),
            attributes: Attributes::new(),
            started_at: Instant::now(),
            duration: None,
            status: None,
            error: None,
            cancel,
        }
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time spent in the provider call; `None` until the provider returns.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    #[must_use]
    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation token shared by every stage of this operation
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn set_duration(&mut self, duration: Duration) {
        self.duration = Some(duration);
    }

    pub(crate) fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub(crate) fn record_error(&mut self, error: &PipelineError, category: ErrorCategory) {
        self.error = Some(ErrorInfo {
            kind: error.kind(),
            category,
            message: error.to_string(),
        });
    }
}
