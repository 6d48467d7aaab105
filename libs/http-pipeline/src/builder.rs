use crate::classify::{ErrorClassifier, PatternClassifier};
use crate::client::{CallSettings, Client, ClientInner};
use crate::compression::{CompressionConfig, Compressor};
use crate::config::ClientConfig;
use crate::error::PipelineError;
use crate::hooks::{HookHandler, HookManager, HookPoint};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::provider::Provider;
use http::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

enum PendingHook {
    Builtin(HookPoint, HookHandler),
    Custom(u32, String, HookHandler),
}

/// Builder for a [`Client`].
///
/// Everything set here can also be changed on the built client; the builder
/// exists so configuration errors surface in one place.
#[must_use = "ClientBuilder does nothing until .build() is called"]
pub struct ClientBuilder {
    provider: Arc<dyn Provider>,
    config: ClientConfig,
    middleware: Vec<Arc<dyn Middleware>>,
    hooks: Vec<PendingHook>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
}

impl ClientBuilder {
    /// Create a builder with default configuration
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            config: ClientConfig::default(),
            middleware: Vec::new(),
            hooks: Vec::new(),
            classifier: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-call provider timeout
    ///
    /// With a retry middleware installed this applies to each attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Add a default header sent with every request that does not set it
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    /// Set the user agent string
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn compression(mut self, compression: CompressionConfig) -> Self {
        self.config.compression = compression;
        self
    }

    /// Bound the number of batch items in flight
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.config.batch.concurrency_limit = Some(limit);
        self
    }

    /// Append a middleware; the first one added is the outermost
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Register a hook at a built-in point
    pub fn hook(mut self, point: HookPoint, handler: HookHandler) -> Self {
        self.hooks.push(PendingHook::Builtin(point, handler));
        self
    }

    /// Register a named hook at a custom point (`>= CUSTOM_HOOK_BASE`)
    pub fn custom_hook(mut self, raw: u32, name: impl Into<String>, handler: HookHandler) -> Self {
        self.hooks.push(PendingHook::Custom(raw, name.into(), handler));
        self
    }

    /// Replace the default [`PatternClassifier`]
    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Build the client
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidHeaderName`] or
    /// [`PipelineError::InvalidHeaderValue`] for a bad default header or user
    /// agent, and the hook registration errors of [`HookManager`].
    pub fn build(self) -> Result<Client, PipelineError> {
        let mut headers = HeaderMap::with_capacity(self.config.headers.len());
        for (name, value) in &self.config.headers {
            headers.insert(
                HeaderName::try_from(name.as_str())?,
                HeaderValue::try_from(value.as_str())?,
            );
        }
        let user_agent = HeaderValue::try_from(self.config.user_agent.as_str())?;

        let hooks = HookManager::new();
        for pending in self.hooks {
            match pending {
                PendingHook::Builtin(point, handler) => hooks.register_hook(point, handler)?,
                PendingHook::Custom(raw, name, handler) => {
                    hooks.register_custom_hook(raw, name, handler)?;
                }
            }
        }

        let middleware = MiddlewareChain::new();
        for layer in self.middleware {
            middleware.use_middleware(layer);
        }

        let mut batch = self.config.batch;
        batch.concurrency_limit = batch.concurrency_limit.map(|limit| limit.max(1));

        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(PatternClassifier::default()));

        tracing::debug!(
            timeout_ms = self.config.request_timeout_ms,
            middleware = middleware.len(),
            concurrency_limit = ?batch.concurrency_limit,
            "pipeline client built"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                provider: self.provider,
                hooks,
                middleware,
                compressor: Compressor::new(self.config.compression),
                classifier,
                settings: RwLock::new(CallSettings {
                    timeout: Duration::from_millis(self.config.request_timeout_ms),
                    user_agent,
                    headers,
                }),
                batch,
            }),
        })
    }
}
