use crate::batch::Batch;
use crate::builder::ClientBuilder;
use crate::classify::ErrorClassifier;
use crate::compression::Compressor;
use crate::config::BatchConfig;
use crate::context::{ExecutionContext, OperationKind};
use crate::error::PipelineError;
use crate::hooks::{HookHandler, HookManager, HookPoint};
use crate::middleware::{Endpoint, Middleware, MiddlewareChain};
use crate::provider::Provider;
use crate::request::{Request, RequestBuilder};
use crate::response::Response;
use crate::stream::{self, StreamHandler, StreamSummary};
use async_trait::async_trait;
use http::header::USER_AGENT;
use http::{HeaderMap, HeaderValue, Method};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Settings read on every call and changeable at runtime
pub(crate) struct CallSettings {
    pub(crate) timeout: Duration,
    pub(crate) user_agent: HeaderValue,
    pub(crate) headers: HeaderMap,
}

/// Everything a call needs, shared by all clones of a [`Client`]
pub(crate) struct ClientInner {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) hooks: HookManager,
    pub(crate) middleware: MiddlewareChain,
    pub(crate) compressor: Compressor,
    pub(crate) classifier: Arc<dyn ErrorClassifier>,
    pub(crate) settings: RwLock<CallSettings>,
    pub(crate) batch: BatchConfig,
}

impl ClientInner {
    pub(crate) fn timeout(&self) -> Duration {
        self.settings.read().timeout
    }

    /// Add default headers and the user agent unless the request sets them
    pub(crate) fn apply_default_headers(&self, request: &mut Request) {
        let settings = self.settings.read();
        let headers = request.headers_mut();
        for (name, value) in &settings.headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, settings.user_agent.clone());
        }
    }

    /// Dispatch a `Before*` point, turning a stop into [`PipelineError::HookAborted`]
    pub(crate) fn run_before_hooks(
        &self,
        point: HookPoint,
        ctx: &mut ExecutionContext,
    ) -> Result<(), PipelineError> {
        let result = self.hooks.dispatch(point, ctx);
        if result.should_continue() {
            return Ok(());
        }
        tracing::debug!(
            point = %point,
            method = %ctx.method(),
            target_url = %ctx.target(),
            "operation aborted by hook"
        );
        Err(PipelineError::HookAborted {
            method: ctx.method().clone(),
            target: ctx.target().to_owned(),
            point,
            source: result.into_error(),
        })
    }

    /// Record `error` in the context and run the `OnError` hooks.
    pub(crate) fn report_error(&self, ctx: &mut ExecutionContext, error: &PipelineError) {
        let category = self.classifier.classify(error);
        ctx.record_error(error, category);
        tracing::debug!(
            kind = %error.kind(),
            category = %category,
            error = %error,
            "pipeline operation failed"
        );
        self.hooks.notify(HookPoint::OnError, ctx);
    }

    /// Report a failure raised before the pipeline could run, such as a
    /// request that could not be assembled.
    pub(crate) fn reject(
        &self,
        kind: OperationKind,
        method: &Method,
        target: &str,
        cancel: CancellationToken,
        error: PipelineError,
    ) -> PipelineError {
        let mut ctx = ExecutionContext::with_cancellation(kind, method.clone(), target, cancel);
        self.report_error(&mut ctx, &error);
        error
    }

    pub(crate) async fn execute(
        &self,
        mut request: Request,
        cancel: CancellationToken,
    ) -> Result<Response, PipelineError> {
        let mut ctx = ExecutionContext::with_cancellation(
            OperationKind::Request,
            request.method().clone(),
            request.target(),
            cancel,
        );

        let result = if ctx.is_cancelled() {
            Err(PipelineError::cancelled(request.method(), request.target()))
        } else {
            self.apply_default_headers(&mut request);
            self.middleware.process(request, &mut ctx, self).await
        };

        if let Err(err) = &result {
            self.report_error(&mut ctx, err);
        }
        result
    }
}

#[async_trait]
impl Endpoint for ClientInner {
    async fn call(
        &self,
        mut request: Request,
        ctx: &mut ExecutionContext,
    ) -> Result<Response, PipelineError> {
        self.run_before_hooks(HookPoint::BeforeRequest, ctx)?;

        let method = request.method().clone();
        let target = request.target().to_owned();
        self.compressor
            .compress_request(&mut request)
            .map_err(|e| PipelineError::encoding(&method, &target, e))?;
        let http_request = request.into_http()?;

        let cancel = ctx.cancellation().clone();
        let timeout = self.timeout();
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PipelineError::cancelled(&method, &target)),
            res = tokio::time::timeout(timeout, self.provider.send(http_request)) => res,
        };
        ctx.set_duration(ctx.started_at().elapsed());

        let http_response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => return Err(PipelineError::transport(&method, &target, source)),
            Err(_) => {
                return Err(PipelineError::Timeout {
                    method,
                    target,
                    timeout,
                });
            }
        };
        ctx.set_status(http_response.status());

        let mut response = Response::from_http(method, target, http_response);
        self.hooks.notify(HookPoint::AfterResponse, ctx);
        self.compressor
            .decompress_response(&mut response)
            .map_err(|e| PipelineError::encoding(response.method(), response.target(), e))?;

        tracing::debug!(
            method = %response.method(),
            target_url = %response.target(),
            status = response.status().as_u16(),
            duration_ms = ctx.duration().map(|d| d.as_millis()),
            "request completed"
        );
        Ok(response)
    }
}

/// Pipeline HTTP client
///
/// Wraps every call to the injected [`Provider`] with the hook system, the
/// middleware chain and transparent compression. Streams and batches go
/// through the same path.
///
/// # Thread Safety
///
/// `Client` is `Clone + Send + Sync`. Clones share hooks, middleware,
/// compressor and settings; there is no global state.
///
/// # Example
///
/// ```ignore
/// let client = Client::builder(Arc::new(HyperProvider::new()?))
///     .timeout(Duration::from_secs(10))
///     .middleware(Arc::new(RetryMiddleware::default()))
///     .build()?;
///
/// let user: User = client
///     .get("https://api.example.com/users/1")
///     .send()
///     .await?
///     .json()?;
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    /// Create a builder around `provider`
    #[must_use]
    pub fn builder(provider: Arc<dyn Provider>) -> ClientBuilder {
        ClientBuilder::new(provider)
    }

    /// Create a GET request builder
    ///
    /// The URL must be absolute (`http` or `https` with a host); anything else
    /// fails with [`PipelineError::InvalidRequest`] when the request is sent.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a PUT request builder
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Create a PATCH request builder
    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Create a DELETE request builder
    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Create a request builder for any method
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url.to_owned())
    }

    /// Stream the response of `method target` into `handler`.
    ///
    /// # Errors
    /// Returns an error only when the call fails before the provider stream
    /// is opened. See [`RequestBuilder::stream`].
    pub async fn stream<H>(
        &self,
        method: Method,
        target: &str,
        handler: &mut H,
    ) -> Result<StreamSummary, PipelineError>
    where
        H: StreamHandler + ?Sized,
    {
        self.request(method, target).stream(handler).await
    }

    /// Start an empty batch using the client's concurrency limit
    #[must_use]
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone(), self.inner.batch.concurrency_limit)
    }

    #[must_use]
    pub fn hooks(&self) -> &HookManager {
        &self.inner.hooks
    }

    /// Register a hook at a built-in point
    ///
    /// # Errors
    /// See [`HookManager::register_hook`].
    pub fn register_hook(
        &self,
        point: HookPoint,
        handler: HookHandler,
    ) -> Result<(), PipelineError> {
        self.inner.hooks.register_hook(point, handler)
    }

    /// Register a named hook at a custom point
    ///
    /// # Errors
    /// See [`HookManager::register_custom_hook`].
    pub fn register_custom_hook(
        &self,
        raw: u32,
        name: impl Into<String>,
        handler: HookHandler,
    ) -> Result<HookPoint, PipelineError> {
        self.inner.hooks.register_custom_hook(raw, name, handler)
    }

    /// Append a middleware; it runs inside the ones added before it
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.inner.middleware.use_middleware(middleware);
    }

    /// Middleware names, outermost first
    #[must_use]
    pub fn middleware_names(&self) -> Vec<String> {
        self.inner.middleware.names()
    }

    #[must_use]
    pub fn compressor(&self) -> &Compressor {
        &self.inner.compressor
    }

    #[must_use]
    pub fn classifier(&self) -> &dyn ErrorClassifier {
        self.inner.classifier.as_ref()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    /// Change the provider-call timeout for subsequent calls
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.settings.write().timeout = timeout;
    }

    /// Replace the default headers added to subsequent calls
    pub fn set_headers(&self, headers: HeaderMap) {
        self.inner.settings.write().headers = headers;
    }

    #[must_use]
    pub fn default_headers(&self) -> HeaderMap {
        self.inner.settings.read().headers.clone()
    }

    /// Release provider resources. Calls made afterwards may fail.
    pub async fn close(&self) {
        tracing::debug!("closing pipeline client");
        self.inner.provider.close().await;
    }

    pub(crate) async fn execute(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<Response, PipelineError> {
        self.inner.execute(request, cancel).await
    }

    pub(crate) async fn stream_request<H>(
        &self,
        request: Request,
        cancel: CancellationToken,
        handler: &mut H,
    ) -> Result<StreamSummary, PipelineError>
    where
        H: StreamHandler + ?Sized,
    {
        stream::run(&self.inner, request, cancel, handler).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("hooks", &self.inner.hooks)
            .field("middleware", &self.inner.middleware)
            .field("timeout", &self.inner.timeout())
            .finish_non_exhaustive()
    }
}
