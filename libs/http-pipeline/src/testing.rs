//! In-process provider for unit tests.

use crate::error::BoxError;
use crate::provider::{ChunkStream, Provider, StreamResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::header::CONTENT_ENCODING;
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What the provider received
#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    headers: HeaderMap,
    body: Bytes,
}

impl SeenRequest {
    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Scripted provider keyed by URI path.
///
/// `send` echoes the request body and `Content-Encoding`; a path of the form
/// `/status/<code>` answers with that status. Streams replay `chunks`.
#[derive(Default)]
pub(crate) struct MockProvider {
    failures: HashSet<String>,
    delays: HashMap<String, Duration>,
    chunks: Vec<Result<Bytes, &'static str>>,
    stall: bool,
    stream_headers: HeaderMap,
    seen: Mutex<Vec<SeenRequest>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail calls to `path` with a transport error
    pub(crate) fn fail(mut self, path: &str) -> Self {
        self.failures.insert(path.to_owned());
        self
    }

    pub(crate) fn delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_owned(), delay);
        self
    }

    pub(crate) fn chunks(mut self, chunks: Vec<Result<Bytes, &'static str>>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Keep the stream open without further data once `chunks` are replayed
    pub(crate) fn then_stall(mut self) -> Self {
        self.stall = true;
        self
    }

    pub(crate) fn stream_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.stream_headers
            .insert(name, HeaderValue::from_static(value));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<SeenRequest> {
        self.seen.lock().last().cloned()
    }

    async fn enter(&self, request: &http::Request<Bytes>) -> Result<String, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(SeenRequest {
            headers: request.headers().clone(),
            body: request.body().clone(),
        });
        let path = request.uri().path().to_owned();
        if let Some(delay) = self.delays.get(&path) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(&path) {
            return Err(format!("connection refused: {path}").into());
        }
        Ok(path)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError> {
        let path = self.enter(&request).await?;
        let status = path
            .strip_prefix("/status/")
            .and_then(|code| code.parse::<u16>().ok())
            .map_or(Ok(StatusCode::OK), StatusCode::from_u16)?;

        let (parts, body) = request.into_parts();
        let mut builder = http::Response::builder()
            .status(status)
            .header("x-path", path.as_str());
        if let Some(encoding) = parts.headers.get(CONTENT_ENCODING) {
            builder = builder.header(CONTENT_ENCODING, encoding);
        }
        Ok(builder.body(body)?)
    }

    async fn open_stream(&self, request: http::Request<Bytes>) -> Result<StreamResponse, BoxError> {
        self.enter(&request).await?;
        let chunks: Vec<Result<Bytes, BoxError>> = self
            .chunks
            .iter()
            .map(|c| c.clone().map_err(BoxError::from))
            .collect();
        let replay = futures::stream::iter(chunks);
        let chunks: ChunkStream = if self.stall {
            Box::pin(replay.chain(futures::stream::pending()))
        } else {
            Box::pin(replay)
        };
        Ok(StreamResponse {
            status: StatusCode::OK,
            headers: self.stream_headers.clone(),
            chunks,
        })
    }
}
