use crate::client::Client;
use crate::context::OperationKind;
use crate::error::{PipelineError, RequestError};
use crate::response::Response;
use crate::stream::{StreamHandler, StreamSummary};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Request body before it reaches the compressor
#[derive(Clone, Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Raw bytes
    Bytes(Bytes),
    /// JSON-serialized value (stored as bytes after serialization)
    Json(Bytes),
    /// Form URL-encoded fields (stored as bytes after serialization)
    Form(Bytes),
}

impl RequestBody {
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Empty => None,
            Self::Bytes(b) | Self::Json(b) | Self::Form(b) => Some(b),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().map_or(0, Bytes::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Bytes(b) | Self::Json(b) | Self::Form(b) => b,
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Json(_) => Some("application/json"),
            Self::Form(_) => Some("application/x-www-form-urlencoded"),
            Self::Empty | Self::Bytes(_) => None,
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<&'static str> for RequestBody {
    fn from(value: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(value.as_bytes()))
    }
}

impl From<()> for RequestBody {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

/// Outbound call description travelling through the middleware chain
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    target: String,
    headers: HeaderMap,
    body: RequestBody,
}

impl Request {
    /// Create a request for an absolute `http`/`https` URL.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidRequest`] if the URL does not parse or
    /// lacks a scheme or host.
    pub fn new(method: Method, url: &str) -> Result<Self, PipelineError> {
        let uri = parse_absolute_uri(url)
            .map_err(|e| PipelineError::invalid_request(&method, url, e))?;
        Ok(Self {
            method,
            uri,
            target: url.to_owned(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        })
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The URL as supplied by the caller
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Replace the body. JSON and form bodies set `Content-Type` unless one is
    /// already present.
    pub fn set_body(&mut self, body: RequestBody) {
        if let Some(content_type) = body.content_type()
            && !self.headers.contains_key(CONTENT_TYPE)
        {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        self.body = body;
    }

    /// Swap in encoded bytes without touching headers.
    pub(crate) fn replace_body_bytes(&mut self, bytes: Bytes) {
        self.body = RequestBody::Bytes(bytes);
    }

    pub(crate) fn into_http(self) -> Result<http::Request<Bytes>, PipelineError> {
        let mut builder = http::Request::builder()
            .method(self.method.clone())
            .uri(self.uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers;
        }
        builder
            .body(self.body.into_bytes())
            .map_err(|e| PipelineError::invalid_request(&self.method, &self.target, e))
    }
}

fn parse_absolute_uri(url: &str) -> Result<Uri, RequestError> {
    let invalid = |reason: String| RequestError::InvalidUri { reason };
    let uri: Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| invalid(format!("'{url}': {e}")))?;

    if uri.authority().is_none() {
        return Err(invalid(format!("'{url}': missing host/authority")));
    }
    match uri.scheme_str() {
        Some("http" | "https") => Ok(uri),
        Some(scheme) => Err(invalid(format!("'{url}': unsupported scheme '{scheme}'"))),
        None => Err(invalid(format!("'{url}': missing scheme"))),
    }
}

/// Fluent request builder
///
/// Created by [`Client::get`], [`Client::post`], etc. URL, header and body
/// errors are deferred: they surface from [`send`](RequestBuilder::send) or
/// [`stream`](RequestBuilder::stream) after the `OnError` hooks have seen them.
///
/// # Example
///
/// ```ignore
/// let resp = client
///     .post("https://api.example.com/users")
///     .header("x-request-id", "123")
///     .json(&NewUser { name: "Alice" })
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() or .stream() is called"]
pub struct RequestBuilder {
    client: Client,
    method: Method,
    url: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: RequestBody,
    cancel: Option<CancellationToken>,
    /// First error captured during building (deferred to `send()`)
    error: Option<RequestError>,
}

impl RequestBuilder {
    pub(crate) fn new(client: Client, method: Method, url: String) -> Self {
        Self {
            client,
            method,
            url,
            headers: Vec::new(),
            body: RequestBody::Empty,
            cancel: None,
            error: None,
        }
    }

    /// Add a single header; a later value for the same name replaces it
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            (Err(e), _) => self.error = Some(e.into()),
            (_, Err(e)) => self.error = Some(e.into()),
        }
        self
    }

    /// Add multiple headers
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        for (name, value) in headers {
            self = self.header(&name, &value);
        }
        self
    }

    /// Set request body as JSON
    ///
    /// Sets `Content-Type: application/json` unless a Content-Type header was
    /// already provided. A serialization failure is deferred to `send()`.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        match serde_json::to_vec(body) {
            Ok(bytes) => self.body = RequestBody::Json(Bytes::from(bytes)),
            Err(e) => self.error = Some(e.into()),
        }
        self
    }

    /// Set request body as form URL-encoded fields
    pub fn form<T: Serialize + ?Sized>(mut self, fields: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        match serde_urlencoded::to_string(fields) {
            Ok(encoded) => self.body = RequestBody::Form(Bytes::from(encoded)),
            Err(e) => self.error = Some(e.into()),
        }
        self
    }

    pub fn body_bytes(mut self, body: Bytes) -> Self {
        self.body = RequestBody::Bytes(body);
        self
    }

    pub fn body_string(mut self, body: String) -> Self {
        self.body = RequestBody::Bytes(Bytes::from(body));
        self
    }

    /// Cancel the call when `token` fires
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn assemble(&mut self) -> Result<Request, PipelineError> {
        if let Some(source) = self.error.take() {
            return Err(PipelineError::invalid_request(&self.method, &self.url, source));
        }
        let mut request = Request::new(self.method.clone(), &self.url)?;
        for (name, value) in self.headers.drain(..) {
            request.headers_mut().insert(name, value);
        }
        request.set_body(std::mem::take(&mut self.body));
        Ok(request)
    }

    /// Run the request through the pipeline
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidRequest`] for a deferred builder error,
    /// or the pipeline error of the call (transport, timeout, cancellation,
    /// hook abort, codec failure).
    pub async fn send(mut self) -> Result<Response, PipelineError> {
        let cancel = self.cancel.take().unwrap_or_default();
        match self.assemble() {
            Ok(request) => self.client.execute(request, cancel).await,
            Err(err) => Err(self.client.inner.reject(
                OperationKind::Request,
                &self.method,
                &self.url,
                cancel,
                err,
            )),
        }
    }

    /// Run the request as a chunked stream feeding `handler`
    ///
    /// # Errors
    /// Returns an error only for failures before the provider stream is opened
    /// (builder errors, `BeforeStream` abort, cancellation). Later failures are
    /// reported to `handler.on_error` and in the returned summary.
    pub async fn stream<H>(mut self, handler: &mut H) -> Result<StreamSummary, PipelineError>
    where
        H: StreamHandler + ?Sized,
    {
        let cancel = self.cancel.take().unwrap_or_default();
        match self.assemble() {
            Ok(request) => self.client.stream_request(request, cancel, handler).await,
            Err(err) => Err(self.client.inner.reject(
                OperationKind::Stream,
                &self.method,
                &self.url,
                cancel,
                err,
            )),
        }
    }
}
