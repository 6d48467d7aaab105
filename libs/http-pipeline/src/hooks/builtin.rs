//! Ready-made hooks.

use super::{HookHandler, HookPoint, HookResult, hook};
use crate::context::ExecutionContext;
use regex::RegexSet;

/// Attribute written by [`timing_hook`]
pub const DURATION_MS_ATTR: &str = "duration_ms";

/// Emits one `debug` event per dispatch at `point`.
#[must_use]
pub fn logging_hook(point: HookPoint) -> HookHandler {
    hook(move |ctx: &mut ExecutionContext| {
        tracing::debug!(
            target: "http_pipeline::hooks",
            point = %point,
            kind = ?ctx.kind(),
            method = %ctx.method(),
            target_url = %ctx.target(),
            status = ?ctx.status().map(|s| s.as_u16()),
            duration_ms = ?ctx.duration().map(|d| d.as_millis()),
            error = ?ctx.error().map(|e| e.kind),
            "pipeline hook"
        );
        HookResult::proceed()
    })
}

/// Copies the provider call duration into the `duration_ms` attribute.
///
/// Meant for `AfterResponse`, `AfterStream` and `OnError`; a no-op while the
/// duration is still unset.
#[must_use]
pub fn timing_hook() -> HookHandler {
    hook(|ctx: &mut ExecutionContext| {
        if let Some(duration) = ctx.duration() {
            let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
            ctx.attributes_mut().insert(DURATION_MS_ATTR, ms);
        }
        HookResult::proceed()
    })
}

/// Compiled set of target patterns refused by [`security_hook`]
#[derive(Debug, Clone)]
pub struct BlockedTargets {
    patterns: RegexSet,
}

impl BlockedTargets {
    /// Compile the given patterns.
    ///
    /// # Errors
    /// Returns an error if any pattern is not a valid regular expression.
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }

    /// Index of the first pattern matching `target`
    #[must_use]
    pub fn first_match(&self, target: &str) -> Option<usize> {
        self.patterns.matches(target).into_iter().next()
    }

    #[must_use]
    pub fn is_blocked(&self, target: &str) -> bool {
        self.patterns.is_match(target)
    }
}

/// Rejects operations whose target matches one of the blocked patterns.
///
/// Register at `BeforeRequest`, `BeforeStream` or `BeforeBatch`.
#[must_use]
pub fn security_hook(blocked: BlockedTargets) -> HookHandler {
    hook(move |ctx: &mut ExecutionContext| match blocked.first_match(ctx.target()) {
        Some(index) => {
            tracing::warn!(
                target: "http_pipeline::hooks",
                method = %ctx.method(),
                target_url = %ctx.target(),
                pattern = index,
                "target blocked"
            );
            HookResult::reject(format!("target '{}' is blocked", ctx.target()))
        }
        None => HookResult::proceed(),
    })
}
