//! Concurrent fan-out of independent requests with per-item results.

use crate::client::Client;
use crate::context::{ExecutionContext, OperationKind};
use crate::error::PipelineError;
use crate::hooks::HookPoint;
use crate::request::{Request, RequestBody};
use crate::response::Response;
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Target recorded in the context of batch-level hooks
const BATCH_TARGET: &str = "batch";

/// Context attribute with the number of successful items, set for `AfterBatch`
pub const BATCH_SUCCEEDED_ATTR: &str = "batch.succeeded";
/// Context attribute with the number of failed items, set for `AfterBatch`
pub const BATCH_FAILED_ATTR: &str = "batch.failed";
/// Context attribute with the item count, set for `BeforeBatch`
pub const BATCH_SIZE_ATTR: &str = "batch.size";

#[derive(Debug, Clone)]
struct BatchItem {
    method: Method,
    target: String,
    body: RequestBody,
}

/// Outcome of one batch item
#[derive(Debug)]
pub struct BatchResult {
    /// Position of the item in the batch
    pub index: usize,
    pub method: Method,
    pub target: String,
    pub outcome: Result<Response, PipelineError>,
    /// Wall time of the item, including any wait for a concurrency slot
    pub duration: Duration,
}

impl BatchResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.outcome.as_ref().ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&PipelineError> {
        self.outcome.as_ref().err()
    }
}

/// A set of requests executed concurrently by [`Batch::execute`].
///
/// Results come back in the order items were added, whatever order they
/// complete in. One item failing never affects the others.
#[must_use = "Batch does nothing until .execute() is called"]
pub struct Batch {
    client: Client,
    items: Vec<BatchItem>,
    concurrency_limit: Option<usize>,
    cancel: CancellationToken,
}

impl Batch {
    pub(crate) fn new(client: Client, concurrency_limit: Option<usize>) -> Self {
        Self {
            client,
            items: Vec::new(),
            concurrency_limit,
            cancel: CancellationToken::new(),
        }
    }

    /// Append one request
    pub fn add(
        &mut self,
        method: Method,
        target: impl Into<String>,
        body: impl Into<RequestBody>,
    ) -> &mut Self {
        self.items.push(BatchItem {
            method,
            target: target.into(),
            body: body.into(),
        });
        self
    }

    /// Override the client's concurrency limit for this batch (`0` means `1`)
    pub fn with_concurrency_limit(mut self, limit: Option<usize>) -> Self {
        self.concurrency_limit = limit.map(|l| l.max(1));
        self
    }

    /// Use `token` to cancel the whole batch; each item gets a child token
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn concurrency_limit(&self) -> Option<usize> {
        self.concurrency_limit
    }

    /// Token cancelling the whole batch
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run every item and collect the results in item order.
    ///
    /// # Errors
    /// Returns [`PipelineError::Cancelled`] if the batch token is already
    /// cancelled and [`PipelineError::HookAborted`] if a `BeforeBatch` hook
    /// stops the batch; no item runs in either case. Item failures are
    /// reported in their [`BatchResult`] only.
    pub async fn execute(self) -> Result<Vec<BatchResult>, PipelineError> {
        if self.items.is_empty() {
            return Ok(Vec::new());
        }
        let inner = Arc::clone(&self.client.inner);
        let mut ctx = ExecutionContext::with_cancellation(
            OperationKind::Batch,
            Method::POST,
            BATCH_TARGET,
            self.cancel.clone(),
        );

        if ctx.is_cancelled() {
            let err = PipelineError::cancelled(&Method::POST, BATCH_TARGET);
            inner.report_error(&mut ctx, &err);
            return Err(err);
        }
        ctx.attributes_mut()
            .insert(BATCH_SIZE_ATTR, i64::try_from(self.items.len()).unwrap_or(i64::MAX));
        if let Err(err) = inner.run_before_hooks(HookPoint::BeforeBatch, &mut ctx) {
            inner.report_error(&mut ctx, &err);
            return Err(err);
        }

        tracing::debug!(
            items = self.items.len(),
            concurrency_limit = ?self.concurrency_limit,
            "executing batch"
        );
        let results = self.run_items().await;

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        let succeeded = results.len() - failed;
        ctx.set_duration(ctx.started_at().elapsed());
        let attrs = ctx.attributes_mut();
        attrs.insert(BATCH_SUCCEEDED_ATTR, i64::try_from(succeeded).unwrap_or(i64::MAX));
        attrs.insert(BATCH_FAILED_ATTR, i64::try_from(failed).unwrap_or(i64::MAX));
        inner.hooks.notify(HookPoint::AfterBatch, &mut ctx);

        tracing::debug!(succeeded, failed, "batch finished");
        Ok(results)
    }

    async fn run_items(self) -> Vec<BatchResult> {
        let semaphore = self.concurrency_limit.map(|l| Arc::new(Semaphore::new(l)));
        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::with_capacity(self.items.len());

        for (index, item) in self.items.iter().cloned().enumerate() {
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.child_token();
            let handle = tasks.spawn(async move {
                let started = Instant::now();
                let outcome = run_item(&client, &item, semaphore, cancel).await;
                BatchResult {
                    index,
                    method: item.method,
                    target: item.target,
                    outcome,
                    duration: started.elapsed(),
                }
            });
            task_index.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<BatchResult>> = Vec::new();
        slots.resize_with(self.items.len(), || None);
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, result)) => {
                    let index = result.index;
                    slots[index] = Some(result);
                }
                Err(join_err) => {
                    let Some(&index) = task_index.get(&join_err.id()) else {
                        continue;
                    };
                    tracing::warn!(index, error = %join_err, "batch task failed");
                    let item = &self.items[index];
                    slots[index] = Some(BatchResult {
                        index,
                        method: item.method.clone(),
                        target: item.target.clone(),
                        outcome: Err(PipelineError::TaskFailed {
                            method: item.method.clone(),
                            target: item.target.clone(),
                            reason: join_err.to_string(),
                        }),
                        duration: Duration::ZERO,
                    });
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let item = &self.items[index];
                    BatchResult {
                        index,
                        method: item.method.clone(),
                        target: item.target.clone(),
                        outcome: Err(PipelineError::TaskFailed {
                            method: item.method.clone(),
                            target: item.target.clone(),
                            reason: "task produced no result".to_owned(),
                        }),
                        duration: Duration::ZERO,
                    }
                })
            })
            .collect()
    }
}

async fn run_item(
    client: &Client,
    item: &BatchItem,
    semaphore: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
) -> Result<Response, PipelineError> {
    let _permit = match semaphore {
        Some(semaphore) => {
            let acquired = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };
            match acquired {
                Some(permit) => Some(permit),
                None => {
                    let err = PipelineError::cancelled(&item.method, &item.target);
                    return Err(reject(client, item, cancel, err));
                }
            }
        }
        None => None,
    };

    match Request::new(item.method.clone(), &item.target) {
        Ok(mut request) => {
            request.set_body(item.body.clone());
            client.execute(request, cancel).await
        }
        Err(err) => Err(reject(client, item, cancel, err)),
    }
}

fn reject(
    client: &Client,
    item: &BatchItem,
    cancel: CancellationToken,
    err: PipelineError,
) -> PipelineError {
    client
        .inner
        .reject(OperationKind::Request, &item.method, &item.target, cancel, err)
}
