//! Typed lifecycle hooks.
//!
//! A hook is a synchronous function over the [`ExecutionContext`] registered at
//! a [`HookPoint`]. Built-in points cover the request, stream and batch
//! lifecycles; integer points at or above [`CUSTOM_HOOK_BASE`] are reserved for
//! callers and must be registered by name.

mod builtin;
mod manager;

pub use builtin::{BlockedTargets, DURATION_MS_ATTR, logging_hook, security_hook, timing_hook};
pub use manager::{HookDescriptor, HookHandler, HookManager};

use crate::context::ExecutionContext;
use crate::error::BoxError;
use std::fmt;

/// First raw value available for caller-defined hook points
pub const CUSTOM_HOOK_BASE: u32 = 1000;

/// Lifecycle point at which hooks are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPoint {
    BeforeRequest,
    AfterResponse,
    BeforeStream,
    AfterStream,
    BeforeBatch,
    AfterBatch,
    OnError,
    /// Caller-defined point; raw value is always `>= CUSTOM_HOOK_BASE`
    Custom(u32),
}

impl HookPoint {
    /// Stable integer code of this point.
    #[must_use]
    pub fn as_raw(self) -> u32 {
        match self {
            Self::BeforeRequest => 0,
            Self::AfterResponse => 1,
            Self::BeforeStream => 2,
            Self::AfterStream => 3,
            Self::BeforeBatch => 4,
            Self::AfterBatch => 5,
            Self::OnError => 6,
            Self::Custom(raw) => raw,
        }
    }

    /// Resolve an integer code.
    ///
    /// Codes `0..=6` map to the built-in points, codes at or above
    /// [`CUSTOM_HOOK_BASE`] to [`HookPoint::Custom`]. Everything in between is
    /// reserved and yields `None`.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        let point = match raw {
            0 => Self::BeforeRequest,
            1 => Self::AfterResponse,
            2 => Self::BeforeStream,
            3 => Self::AfterStream,
            4 => Self::BeforeBatch,
            5 => Self::AfterBatch,
            6 => Self::OnError,
            r if r >= CUSTOM_HOOK_BASE => Self::Custom(r),
            _ => return None,
        };
        Some(point)
    }

    #[must_use]
    pub fn is_custom(self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// `Before*` points veto the operation when a hook stops dispatch.
    #[must_use]
    pub fn is_before(self) -> bool {
        matches!(
            self,
            Self::BeforeRequest | Self::BeforeStream | Self::BeforeBatch
        )
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeRequest => f.write_str("before_request"),
            Self::AfterResponse => f.write_str("after_response"),
            Self::BeforeStream => f.write_str("before_stream"),
            Self::AfterStream => f.write_str("after_stream"),
            Self::BeforeBatch => f.write_str("before_batch"),
            Self::AfterBatch => f.write_str("after_batch"),
            Self::OnError => f.write_str("on_error"),
            Self::Custom(raw) => write!(f, "custom({raw})"),
        }
    }
}

/// Outcome of a single hook invocation
#[derive(Debug)]
#[must_use]
pub struct HookResult {
    proceed: bool,
    error: Option<BoxError>,
}

impl HookResult {
    /// Continue with the next hook
    pub fn proceed() -> Self {
        Self {
            proceed: true,
            error: None,
        }
    }

    /// Stop dispatch without an error
    pub fn halt() -> Self {
        Self {
            proceed: false,
            error: None,
        }
    }

    /// Stop dispatch and attach the reason
    pub fn reject(error: impl Into<BoxError>) -> Self {
        Self {
            proceed: false,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn should_continue(&self) -> bool {
        self.proceed
    }

    #[must_use]
    pub fn error(&self) -> Option<&BoxError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn into_error(self) -> Option<BoxError> {
        self.error
    }
}

impl Default for HookResult {
    fn default() -> Self {
        Self::proceed()
    }
}

/// Shorthand for boxing a hook closure.
pub fn hook<F>(f: F) -> HookHandler
where
    F: Fn(&mut ExecutionContext) -> HookResult + Send + Sync + 'static,
{
    std::sync::Arc::new(f)
}
