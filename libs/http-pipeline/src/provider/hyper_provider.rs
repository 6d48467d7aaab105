use super::{Provider, StreamResponse};
use crate::error::BoxError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyDataStream, BodyExt, Full, Limited};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Transport security configuration
///
/// Controls whether the provider enforces TLS or allows insecure HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (for testing with mock servers only)
    ///
    /// **WARNING**: Never use in production as it exposes traffic to interception.
    AllowInsecureHttp,
}

/// Connection settings for [`HyperProvider`]
#[derive(Debug, Clone)]
pub struct HyperProviderConfig {
    /// Idle timeout for pooled connections (default: 90 seconds, `None` keeps them forever)
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
    /// Maximum buffered response body size for `send` (default: 10 MB)
    pub max_body_size: usize,
    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,
}

impl Default for HyperProviderConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            max_body_size: 10 * 1024 * 1024,
            transport: TransportSecurity::TlsOnly,
        }
    }
}

impl HyperProviderConfig {
    /// Allow insecure HTTP connections (for testing only)
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "http_pipeline::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.transport = TransportSecurity::AllowInsecureHttp;
        self
    }
}

/// Production provider backed by hyper, hyper-util's pooled client and rustls
/// with Mozilla's root certificates.
pub struct HyperProvider {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    max_body_size: usize,
    closed: AtomicBool,
}

impl HyperProvider {
    /// Build a provider with default settings.
    ///
    /// # Errors
    /// Returns an error if the TLS configuration cannot be created.
    pub fn new() -> Result<Self, BoxError> {
        Self::with_config(HyperProviderConfig::default())
    }

    /// Build a provider from explicit settings.
    ///
    /// # Errors
    /// Returns an error if the TLS configuration cannot be created.
    pub fn with_config(config: HyperProviderConfig) -> Result<Self, BoxError> {
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let https = build_https_connector(config.transport)?;

        let mut builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to take effect
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle) = config.pool_idle_timeout {
            builder.pool_idle_timeout(idle);
        }

        Ok(Self {
            client: builder.build::<_, Full<Bytes>>(https),
            max_body_size: config.max_body_size,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), BoxError> {
        if self.closed.load(Ordering::Acquire) {
            return Err("provider is closed".into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for HyperProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperProvider")
            .field("max_body_size", &self.max_body_size)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for HyperProvider {
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError> {
        self.ensure_open()?;
        let response = self.client.request(request.map(Full::new)).await?;
        let (parts, body) = response.into_parts();
        let body = Limited::new(body, self.max_body_size)
            .collect()
            .await?
            .to_bytes();
        Ok(http::Response::from_parts(parts, body))
    }

    async fn open_stream(&self, request: http::Request<Bytes>) -> Result<StreamResponse, BoxError> {
        self.ensure_open()?;
        let response = self.client.request(request.map(Full::new)).await?;
        let (parts, body) = response.into_parts();
        let chunks = BodyDataStream::new(body).map_err(BoxError::from);
        Ok(StreamResponse {
            status: parts.status,
            headers: parts.headers,
            chunks: Box::pin(chunks),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        tracing::debug!("hyper provider closed");
    }
}

/// Crypto provider: the process default if one is installed, otherwise aws-lc-rs.
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn build_https_connector(
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, BoxError> {
    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(crypto_provider())
        .map_err(|e| Box::new(e) as BoxError)?;
    let connector = if transport == TransportSecurity::AllowInsecureHttp {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
