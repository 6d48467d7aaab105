//! Error categorization for telemetry.

use crate::error::{ErrorKind, PipelineError};
use regex::RegexSet;
use std::error::Error as _;
use std::fmt;

/// Telemetry category of a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    Connection,
    Dns,
    Tls,
    Timeout,
    Cancelled,
    Encoding,
    Validation,
    /// Vetoed by a hook
    Rejected,
    Status,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connection => "connection",
            Self::Dns => "dns",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Encoding => "encoding",
            Self::Validation => "validation",
            Self::Rejected => "rejected",
            Self::Status => "status",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Maps a pipeline error to a category stored in the context before `OnError`
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &PipelineError) -> ErrorCategory;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&PipelineError) -> ErrorCategory + Send + Sync,
{
    fn classify(&self, error: &PipelineError) -> ErrorCategory {
        self(error)
    }
}

/// Transport message patterns, checked in order. DNS and TLS come before the
/// generic connection rule because resolver and handshake failures are usually
/// wrapped in a connect error.
const DEFAULT_RULES: &[(ErrorCategory, &str)] = &[
    (
        ErrorCategory::Dns,
        concat!(
            r"(?i)\bdns\b|failed to lookup address|name or service not known",
            r"|no such host|nodename nor servname",
        ),
    ),
    (
        ErrorCategory::Tls,
        r"(?i)\btls\b|\bssl\b|certificate|handshake",
    ),
    (ErrorCategory::Timeout, r"(?i)timed? ?out|deadline"),
    (
        ErrorCategory::Connection,
        concat!(
            r"(?i)connection (refused|reset|closed|aborted)|broken pipe",
            r"|connect(ion)? error|unreachable|incomplete message",
        ),
    ),
];

/// Kind-first classifier with a compiled pattern fallback for transport errors
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    categories: Vec<ErrorCategory>,
    patterns: RegexSet,
}

impl PatternClassifier {
    /// Build a classifier from ordered `(category, pattern)` rules.
    ///
    /// # Errors
    /// Returns an error if any pattern fails to compile.
    pub fn new<S: AsRef<str>>(rules: &[(ErrorCategory, S)]) -> Result<Self, regex::Error> {
        let patterns = RegexSet::new(rules.iter().map(|(_, p)| p.as_ref()))?;
        Ok(Self {
            categories: rules.iter().map(|(c, _)| *c).collect(),
            patterns,
        })
    }

    fn match_chain(&self, error: &PipelineError) -> Option<ErrorCategory> {
        // Only the causes: the top-level message embeds the target URL
        let mut text = String::new();
        let mut source = error.source();
        while let Some(cause) = source {
            if !text.is_empty() {
                text.push_str(": ");
            }
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        // RegexSet yields indices ascending, which is rule order
        self.patterns
            .matches(&text)
            .into_iter()
            .next()
            .and_then(|i| self.categories.get(i).copied())
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RULES).unwrap_or_else(|_| Self {
            categories: Vec::new(),
            patterns: RegexSet::empty(),
        })
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, error: &PipelineError) -> ErrorCategory {
        match error.kind() {
            ErrorKind::Validation => ErrorCategory::Validation,
            ErrorKind::Encoding => ErrorCategory::Encoding,
            ErrorKind::HookAbort => ErrorCategory::Rejected,
            ErrorKind::Status => ErrorCategory::Status,
            ErrorKind::Cancellation => match error {
                PipelineError::Timeout { .. } | PipelineError::DeadlineExceeded { .. } => {
                    ErrorCategory::Timeout
                }
                _ => ErrorCategory::Cancelled,
            },
            ErrorKind::Transport => self.match_chain(error).unwrap_or(ErrorCategory::Connection),
            _ => self.match_chain(error).unwrap_or(ErrorCategory::Unknown),
        }
    }
}
