//! Chunked response transfer into a caller-supplied [`StreamHandler`].

use crate::client::ClientInner;
use crate::context::{ExecutionContext, OperationKind};
use crate::error::{BoxError, ErrorKind, PipelineError};
use crate::hooks::HookPoint;
use crate::request::Request;
use futures::StreamExt;
use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;

/// Receives the body of a streamed response.
///
/// `on_data` is called once per chunk in arrival order; the slice is only
/// valid for the duration of the call. Exactly one of `on_complete` or a
/// single `on_error` ends the transfer.
pub trait StreamHandler: Send {
    /// Consume one chunk. Returning an error stops the transfer.
    ///
    /// # Errors
    /// Any error ends the stream and is reported back through `on_error` as
    /// [`PipelineError::Handler`].
    fn on_data(&mut self, chunk: &[u8]) -> Result<(), BoxError>;

    /// Terminal failure after the stream was opened.
    fn on_error(&mut self, error: &PipelineError);

    /// Clean end of stream.
    fn on_complete(&mut self) {}
}

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// Terminated by an error already reported to the handler
    Failed(ErrorKind),
}

/// Result of a finished (or failed) transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Response status, if the provider stream was opened
    pub status: Option<StatusCode>,
    /// Chunks delivered to `on_data`
    pub chunks: usize,
    /// Decoded bytes delivered to `on_data`
    pub bytes: u64,
    pub outcome: StreamOutcome,
}

impl StreamSummary {
    fn new() -> Self {
        Self {
            status: None,
            chunks: 0,
            bytes: 0,
            outcome: StreamOutcome::Completed,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome == StreamOutcome::Completed
    }
}

/// Drive one streamed call.
///
/// Failures before the provider stream is opened are returned as `Err` and the
/// handler is never called. After that, failures go to `handler.on_error` and
/// the `OnError` hooks, and the summary carries `StreamOutcome::Failed`.
pub(crate) async fn run<H>(
    inner: &ClientInner,
    mut request: Request,
    cancel: CancellationToken,
    handler: &mut H,
) -> Result<StreamSummary, PipelineError>
where
    H: StreamHandler + ?Sized,
{
    let method = request.method().clone();
    let target = request.target().to_owned();
    let mut ctx = ExecutionContext::with_cancellation(
        OperationKind::Stream,
        method.clone(),
        target.clone(),
        cancel,
    );

    if let Err(err) = prepare(inner, &mut request, &mut ctx) {
        inner.report_error(&mut ctx, &err);
        return Err(err);
    }
    let http_request = match request.into_http() {
        Ok(req) => req,
        Err(err) => {
            inner.report_error(&mut ctx, &err);
            return Err(err);
        }
    };

    let mut summary = StreamSummary::new();
    let transfer = Transfer {
        method: &method,
        target: &target,
        summary: &mut summary,
    };
    match transfer.pump(inner, http_request, &mut ctx, handler).await {
        Ok(()) => {
            inner.hooks.notify(HookPoint::AfterStream, &mut ctx);
            handler.on_complete();
            tracing::debug!(
                method = %method,
                target_url = %target,
                chunks = summary.chunks,
                bytes = summary.bytes,
                "stream completed"
            );
        }
        Err(err) => {
            handler.on_error(&err);
            inner.report_error(&mut ctx, &err);
            summary.outcome = StreamOutcome::Failed(err.kind());
        }
    }
    Ok(summary)
}

fn prepare(
    inner: &ClientInner,
    request: &mut Request,
    ctx: &mut ExecutionContext,
) -> Result<(), PipelineError> {
    if ctx.is_cancelled() {
        return Err(PipelineError::cancelled(request.method(), request.target()));
    }
    inner.run_before_hooks(HookPoint::BeforeStream, ctx)?;
    inner.apply_default_headers(request);
    inner
        .compressor
        .compress_request(request)
        .map_err(|e| PipelineError::encoding(request.method(), request.target(), e))?;
    Ok(())
}

struct Transfer<'a> {
    method: &'a Method,
    target: &'a str,
    summary: &'a mut StreamSummary,
}

impl Transfer<'_> {
    async fn pump<H>(
        mut self,
        inner: &ClientInner,
        request: http::Request<bytes::Bytes>,
        ctx: &mut ExecutionContext,
        handler: &mut H,
    ) -> Result<(), PipelineError>
    where
        H: StreamHandler + ?Sized,
    {
        let cancel = ctx.cancellation().clone();
        let timeout = inner.timeout();

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(PipelineError::cancelled(self.method, self.target));
            }
            res = tokio::time::timeout(timeout, inner.provider.open_stream(request)) => res,
        };
        let response = match opened {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(PipelineError::transport(self.method, self.target, source));
            }
            Err(_) => {
                return Err(PipelineError::Timeout {
                    method: self.method.clone(),
                    target: self.target.to_owned(),
                    timeout,
                });
            }
        };
        ctx.set_duration(ctx.started_at().elapsed());
        ctx.set_status(response.status);
        self.summary.status = Some(response.status);

        let mut decoder = inner.compressor.stream_decoder(&response.headers);
        let mut chunks = response.chunks;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(PipelineError::cancelled(self.method, self.target));
                }
                next = chunks.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk =
                chunk.map_err(|e| PipelineError::transport(self.method, self.target, e))?;
            tracing::trace!(size = chunk.len(), "stream chunk received");

            match decoder.as_mut() {
                Some(decoder) => {
                    let decoded = decoder
                        .decode_chunk(&chunk)
                        .map_err(|e| PipelineError::encoding(self.method, self.target, e))?;
                    self.deliver(handler, decoded)?;
                }
                None => self.deliver(handler, &chunk)?,
            }
        }

        if let Some(decoder) = decoder.as_mut() {
            let tail = decoder
                .finish()
                .map_err(|e| PipelineError::encoding(self.method, self.target, e))?;
            self.deliver(handler, tail)?;
        }
        ctx.set_duration(ctx.started_at().elapsed());
        Ok(())
    }

    fn deliver<H>(&mut self, handler: &mut H, data: &[u8]) -> Result<(), PipelineError>
    where
        H: StreamHandler + ?Sized,
    {
        if data.is_empty() {
            return Ok(());
        }
        self.summary.chunks += 1;
        self.summary.bytes += data.len() as u64;
        handler.on_data(data).map_err(|source| PipelineError::Handler {
            method: self.method.clone(),
            target: self.target.to_owned(),
            chunk: self.summary.chunks,
            source,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::compression::{Encoding, encode};
    use crate::hooks::{HookResult, hook};
    use crate::testing::MockProvider;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        chunks: Vec<Vec<u8>>,
        errors: Vec<ErrorKind>,
        completed: usize,
        fail_on: Option<usize>,
    }

    impl StreamHandler for Recorder {
        fn on_data(&mut self, chunk: &[u8]) -> Result<(), BoxError> {
            self.chunks.push(chunk.to_vec());
            if self.fail_on == Some(self.chunks.len()) {
                return Err("disk full".into());
            }
            Ok(())
        }

        fn on_error(&mut self, error: &PipelineError) {
            self.errors.push(error.kind());
        }

        fn on_complete(&mut self) {
            self.completed += 1;
        }
    }

    fn five_chunks() -> Vec<Result<Bytes, &'static str>> {
        (1..=5)
            .map(|i| Ok(Bytes::from(format!("chunk-{i};"))))
            .collect()
    }

    fn client(provider: MockProvider) -> Client {
        Client::builder(Arc::new(provider)).build().unwrap()
    }

    #[tokio::test]
    async fn test_chunks_delivered_in_order_then_complete() {
        let client = client(MockProvider::new().chunks(five_chunks()));
        let after = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&after);
        client
            .register_hook(
                HookPoint::AfterStream,
                hook(move |ctx| {
                    assert_eq!(ctx.kind(), OperationKind::Stream);
                    assert_eq!(ctx.status(), Some(StatusCode::OK));
                    a.fetch_add(1, Ordering::SeqCst);
                    HookResult::proceed()
                }),
            )
            .unwrap();

        let mut handler = Recorder::default();
        let summary = client
            .stream(Method::GET, "https://api.test/feed", &mut handler)
            .await
            .unwrap();

        assert!(summary.is_completed());
        assert_eq!(summary.chunks, 5);
        assert_eq!(summary.status, Some(StatusCode::OK));
        assert_eq!(handler.chunks.concat(), b"chunk-1;chunk-2;chunk-3;chunk-4;chunk-5;");
        assert_eq!(handler.completed, 1);
        assert!(handler.errors.is_empty());
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_on_third_chunk_stops_transfer() {
        let client = client(MockProvider::new().chunks(five_chunks()));
        let on_error = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&on_error);
        client
            .register_hook(
                HookPoint::OnError,
                hook(move |_| {
                    o.fetch_add(1, Ordering::SeqCst);
                    HookResult::proceed()
                }),
            )
            .unwrap();

        let mut handler = Recorder {
            fail_on: Some(3),
            ..Default::default()
        };
        let summary = client
            .get("https://api.test/feed")
            .stream(&mut handler)
            .await
            .unwrap();

        assert_eq!(handler.chunks.len(), 3);
        assert_eq!(handler.errors, vec![ErrorKind::Handler]);
        assert_eq!(handler.completed, 0);
        assert_eq!(summary.outcome, StreamOutcome::Failed(ErrorKind::Handler));
        assert_eq!(on_error.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_error_reported_once() {
        let client = client(MockProvider::new().chunks(vec![
            Ok(Bytes::from_static(b"first")),
            Err("connection reset"),
            Ok(Bytes::from_static(b"never")),
        ]));
        let mut handler = Recorder::default();
        let summary = client
            .stream(Method::GET, "https://api.test/feed", &mut handler)
            .await
            .unwrap();

        assert_eq!(handler.chunks, vec![b"first".to_vec()]);
        assert_eq!(handler.errors, vec![ErrorKind::Transport]);
        assert_eq!(handler.completed, 0);
        assert_eq!(summary.outcome, StreamOutcome::Failed(ErrorKind::Transport));
    }

    #[tokio::test]
    async fn test_open_failure_goes_to_handler() {
        let client = client(MockProvider::new().fail("/feed"));
        let mut handler = Recorder::default();
        let summary = client
            .stream(Method::GET, "https://api.test/feed", &mut handler)
            .await
            .unwrap();
        assert_eq!(summary.status, None);
        assert_eq!(handler.errors, vec![ErrorKind::Transport]);
    }

    #[tokio::test]
    async fn test_before_stream_abort_is_returned_not_reported() {
        let client = client(MockProvider::new().chunks(five_chunks()));
        client
            .register_hook(HookPoint::BeforeStream, hook(|_| HookResult::halt()))
            .unwrap();
        let mut handler = Recorder::default();
        let err = client
            .stream(Method::GET, "https://api.test/feed", &mut handler)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HookAbort);
        assert!(handler.errors.is_empty());
        assert!(handler.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_open_is_returned() {
        let client = client(MockProvider::new().chunks(five_chunks()));
        let token = CancellationToken::new();
        token.cancel();
        let mut handler = Recorder::default();
        let err = client
            .get("https://api.test/feed")
            .cancel_token(token)
            .stream(&mut handler)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { .. }));
        assert!(handler.errors.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_open_goes_to_on_error() {
        let first_two = five_chunks().into_iter().take(2).collect();
        let client = client(MockProvider::new().chunks(first_two).then_stall());
        let on_error = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&on_error);
        client
            .register_hook(
                HookPoint::OnError,
                hook(move |_| {
                    o.fetch_add(1, Ordering::SeqCst);
                    HookResult::proceed()
                }),
            )
            .unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let mut handler = Recorder::default();
        let summary = client
            .get("https://api.test/feed")
            .cancel_token(token)
            .stream(&mut handler)
            .await
            .unwrap();

        assert_eq!(summary.status, Some(StatusCode::OK));
        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.outcome, StreamOutcome::Failed(ErrorKind::Cancellation));
        assert_eq!(handler.chunks.concat(), b"chunk-1;chunk-2;");
        assert_eq!(handler.errors, vec![ErrorKind::Cancellation]);
        assert_eq!(handler.completed, 0);
        assert_eq!(on_error.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gzip_stream_decoded_per_chunk() {
        let plain = "line of streamed text\n".repeat(200);
        let encoded = encode(Encoding::Gzip, plain.as_bytes(), 6).unwrap();
        let chunks = encoded
            .chunks(64)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let client = client(
            MockProvider::new()
                .chunks(chunks)
                .stream_header("content-encoding", "gzip"),
        );

        let mut handler = Recorder::default();
        let summary = client
            .stream(Method::GET, "https://api.test/feed", &mut handler)
            .await
            .unwrap();
        assert!(summary.is_completed());
        assert_eq!(handler.chunks.concat(), plain.as_bytes());
        assert_eq!(summary.bytes, plain.len() as u64);
    }
}
