use super::{Middleware, Next};
use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::request::Request;
use crate::response::{Response, parse_retry_after};
use async_trait::async_trait;
use http::{HeaderValue, Method, StatusCode};
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Header carrying the retry number (1-based) on every re-sent request
pub const RETRY_ATTEMPT_HEADER: &str = "X-Retry-Attempt";

/// Header that makes a non-idempotent request safe to replay
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Context attribute holding the number of retries performed
pub const RETRY_ATTEMPTS_ATTR: &str = "retry.attempts";

/// Whether `method` is idempotent per RFC 9110
#[must_use]
pub fn is_idempotent_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}

/// Retry policy for [`RetryMiddleware`].
///
/// Transport errors, provider timeouts and `idempotent_retry_statuses` are
/// retried only when the request is safe to replay: an idempotent method or an
/// [`IDEMPOTENCY_KEY_HEADER`]. `always_retry_statuses` are retried for any
/// method.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3)
    pub max_retries: usize,
    /// Delay before the first retry, doubled for each further one (default: 100ms)
    pub base_delay: Duration,
    /// Cap on the computed backoff (default: 10s)
    pub max_delay: Duration,
    /// Add a random 0-25% to each computed delay (default: true)
    pub jitter: bool,
    pub always_retry_statuses: Vec<StatusCode>,
    pub idempotent_retry_statuses: Vec<StatusCode>,
    /// Deadline spanning all attempts and delays (default: none)
    pub total_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
            always_retry_statuses: vec![StatusCode::TOO_MANY_REQUESTS],
            idempotent_retry_statuses: vec![
                StatusCode::REQUEST_TIMEOUT,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
            total_timeout: None,
        }
    }
}

impl RetryConfig {
    /// Config with no retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Computed delay before retry number `retry + 1`
    #[must_use]
    pub fn backoff(&self, retry: usize) -> Duration {
        let exponent = u32::try_from(retry).unwrap_or(u32::MAX).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay);
        if self.jitter {
            delay + delay.mul_f64(rand::rng().random_range(0.0..=0.25))
        } else {
            delay
        }
    }

    fn should_retry(&self, result: &Result<Response, PipelineError>, replay_safe: bool) -> bool {
        match result {
            Ok(resp) => {
                let status = resp.status();
                self.always_retry_statuses.contains(&status)
                    || (replay_safe && self.idempotent_retry_statuses.contains(&status))
            }
            Err(PipelineError::Transport { .. } | PipelineError::Timeout { .. }) => replay_safe,
            Err(_) => false,
        }
    }
}

/// Retries the rest of the chain with exponential backoff and jitter.
///
/// Every attempt re-runs the inner middleware and the `BeforeRequest` /
/// `AfterResponse` hooks. A `Retry-After` header replaces the computed delay.
/// Backoff sleeps race the operation's cancellation token. After exhausting
/// retries on a status the last response is returned as `Ok`.
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    config: RetryConfig,
}

impl RetryMiddleware {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

struct Deadline {
    at: Instant,
    total: Duration,
}

impl Deadline {
    fn check(&self, request: &Request) -> Result<Duration, PipelineError> {
        let remaining = self.at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(PipelineError::DeadlineExceeded {
                method: request.method().clone(),
                target: request.target().to_owned(),
                deadline: self.total,
            });
        }
        Ok(remaining)
    }
}

async fn backoff_sleep(
    delay: Duration,
    ctx: &ExecutionContext,
    request: &Request,
) -> Result<(), PipelineError> {
    let cancel = ctx.cancellation().clone();
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            Err(PipelineError::cancelled(request.method(), request.target()))
        }
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<Response, PipelineError> {
        let config = &self.config;
        let replay_safe = is_idempotent_method(request.method())
            || request.headers().contains_key(IDEMPOTENCY_KEY_HEADER);
        let deadline = config.total_timeout.map(|total| Deadline {
            at: Instant::now() + total,
            total,
        });

        let mut attempt = 0usize;
        loop {
            if let Some(deadline) = &deadline {
                deadline.check(&request)?;
            }

            let mut req = request.clone();
            if attempt > 0
                && let Ok(value) = HeaderValue::try_from(attempt.to_string())
            {
                req.headers_mut().insert(RETRY_ATTEMPT_HEADER, value);
            }

            let result = next.run(req, ctx).await;
            if attempt >= config.max_retries || !config.should_retry(&result, replay_safe) {
                return result;
            }

            let retry_after = result
                .as_ref()
                .ok()
                .and_then(|resp| parse_retry_after(resp.headers()));
            let mut delay = retry_after.unwrap_or_else(|| config.backoff(attempt));
            if let Some(deadline) = &deadline {
                delay = delay.min(deadline.check(&request)?);
            }

            tracing::debug!(
                retry = attempt + 1,
                max_retries = config.max_retries,
                status = result.as_ref().ok().map(|resp| resp.status().as_u16()),
                error = ?result.as_ref().err().map(ToString::to_string),
                method = %request.method(),
                target_url = %request.target(),
                backoff_ms = delay.as_millis(),
                retry_after_used = retry_after.is_some(),
                "Retrying request"
            );
            backoff_sleep(delay, ctx, &request).await?;
            attempt += 1;
            ctx.attributes_mut()
                .insert(RETRY_ATTEMPTS_ATTR, i64::try_from(attempt).unwrap_or(i64::MAX));
        }
    }

    fn name(&self) -> &str {
        "retry"
    }
}
