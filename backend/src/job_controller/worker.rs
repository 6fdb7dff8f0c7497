//! Background execution of one batch.

use super::archive::{self, ArchiveSummary, ARCHIVE_NAME};
use super::cancel::CancellationToken;
use super::{EngineInner, Pipeline};
use crate::error::RenderError;
use crate::render::resilient::RetryPolicy;
use crate::render::RenderRequest;
use crate::source::RecordStream;
use crate::template::TemplateModel;
use chrono::Utc;
use common::events::{ArchiveRef, BatchEvent};
use common::jobs::BatchStatus;
use common::model::batch::{DocumentResult, NotificationRecord};
use common::model::options::OutputOptions;
use common::model::record::Record;
use common::requests::NotificationTarget;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

pub(super) const OUTPUT_DIR: &str = "out";
const ERROR_SUMMARY_LINES: usize = 5;
/// Progress events waiting for delivery before new ones are dropped.
const EVENT_BACKLOG: usize = 32;

/// Everything a batch needs once it has been accepted.
///
/// Built by `BatchEngine::submit` and moved into the task spawned for
/// [`run`]. `done` flips to `true` after the terminal transition, the final
/// notification and the ledger write.
pub(super) struct BatchJob {
    pub id: String,
    pub template: Arc<TemplateModel>,
    pub options: Arc<OutputOptions>,
    pub records: RecordStream,
    pub pipeline: Pipeline,
    pub notify: Option<NotificationTarget>,
    pub token: CancellationToken,
    pub done: watch::Sender<bool>,
}

/// `document_<row>.<ext>` with the row zero-padded to the width of `total`.
pub(super) fn document_name(row: usize, total: usize, extension: &str) -> String {
    let width = total.to_string().len();
    format!("document_{:0width$}.{}", row, extension, width = width)
}

/// Shared by the workers of one batch.
struct RunContext {
    inner: Arc<EngineInner>,
    id: String,
    template: Arc<TemplateModel>,
    options: Arc<OutputOptions>,
    retry: RetryPolicy,
    width: usize,
    total: usize,
    token: CancellationToken,
    events: mpsc::Sender<BatchEvent>,
    out_dir: PathBuf,
    abort: Mutex<Option<String>>,
}

impl RunContext {
    fn abort_reason(&self) -> Option<String> {
        self.abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keeps the first reason.
    fn set_abort(&self, reason: String) {
        let mut abort = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
        if abort.is_none() {
            *abort = Some(reason);
        }
    }

    async fn process(&self, record: Record) -> Option<DocumentResult> {
        let row = record.row_index;
        let request =
            RenderRequest::new(&self.id, self.template.clone(), self.options.clone(), record);
        match self
            .inner
            .renderer
            .render(&request, self.retry, &self.token)
            .await
        {
            Ok(bytes) => Some(self.write(row, bytes).await),
            Err(RenderError::Cancelled) => {
                debug!("Batch {} row {} skipped after cancellation", self.id, row);
                None
            }
            Err(e) if e.is_engine_fatal() => {
                error!("Batch {} aborting at row {}: {}", self.id, row, e);
                self.set_abort(e.to_string());
                Some(DocumentResult::failed(row, e.to_string(), Utc::now()))
            }
            Err(e) => {
                warn!("Batch {} row {} failed: {}", self.id, row, e);
                Some(DocumentResult::failed(row, e.to_string(), Utc::now()))
            }
        }
    }

    async fn write(&self, row: usize, bytes: Vec<u8>) -> DocumentResult {
        let name = document_name(row, self.total, self.options.format.extension());
        let path = self.out_dir.join(&name);
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => DocumentResult::completed(row, name, path, bytes.len() as u64, Utc::now()),
            Err(e) => {
                warn!("Batch {} could not write {}: {}", self.id, name, e);
                DocumentResult::failed(row, format!("writing {}: {}", name, e), Utc::now())
            }
        }
    }

    async fn append(&self, result: DocumentResult) {
        let row = result.row_index;
        match self.inner.store.update(&self.id, |b| b.record(result)).await {
            Some(Ok((before, after))) => self.progress_crossed(before, after).await,
            Some(Err(e)) => error!("Batch {} could not record row {}: {}", self.id, row, e),
            None => warn!("Batch {} vanished while row {} was in flight", self.id, row),
        }
    }

    /// Emit one progress event when a configured threshold was crossed.
    async fn progress_crossed(&self, before: u8, after: u8) {
        let crossed = self
            .inner
            .config
            .progress_thresholds
            .iter()
            .any(|t| before < *t && *t <= after);
        if !crossed || after >= 100 {
            return;
        }
        if let Some(event) = progress_event(&self.inner, &self.id, self.width).await {
            post_progress(&self.events, &self.id, event);
        }
    }
}

/// Delivers the events of one batch in the order they were posted.
///
/// Progress events are posted without waiting and dropped when the backlog
/// is full. The terminal event goes through [`Outbox::close`], which only
/// returns once everything queued before it has been handed to the notifier.
struct Outbox {
    events: mpsc::Sender<BatchEvent>,
    delivery: JoinHandle<()>,
}

impl Outbox {
    fn open(inner: Arc<EngineInner>, id: String, target: Option<NotificationTarget>) -> Self {
        let (events, mut rx) = mpsc::channel::<BatchEvent>(EVENT_BACKLOG);
        let delivery = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(&inner, &id, &event, target.as_ref()).await;
            }
        });
        Self { events, delivery }
    }

    fn sender(&self) -> mpsc::Sender<BatchEvent> {
        self.events.clone()
    }

    /// Queue `terminal` behind the pending progress events and wait until
    /// all of them are delivered. Every other sender must be gone by now.
    async fn close(self, id: &str, terminal: Option<BatchEvent>) {
        let Self { events, delivery } = self;
        if let Some(event) = terminal {
            if events.send(event).await.is_err() {
                error!("Batch {} lost its terminal notification", id);
            }
        }
        drop(events);
        if let Err(e) = delivery.await {
            error!("Batch {} notification task failed: {}", id, e);
        }
    }
}

fn post_progress(events: &mpsc::Sender<BatchEvent>, id: &str, event: BatchEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => debug!("Batch {} progress event dropped, backlog full", id),
        Err(TrySendError::Closed(_)) => warn!("Batch {} progress after delivery closed", id),
    }
}

async fn progress_event(inner: &EngineInner, id: &str, width: usize) -> Option<BatchEvent> {
    let summary = inner.store.read(id, |b| b.summary()).await?;
    let remaining = summary.totals.total - summary.totals.processed();
    Some(BatchEvent::BatchProgress {
        estimated_remaining_ms: inner.estimate(remaining, width).as_millis() as u64,
        summary,
    })
}

/// Hand `event` to the notifier and record the outcome on the batch.
async fn deliver(
    inner: &EngineInner,
    id: &str,
    event: &BatchEvent,
    target: Option<&NotificationTarget>,
) {
    let outcome = inner.notifier.notify(event, target).await;
    if let Err(e) = &outcome {
        warn!("Batch {} notification {} failed: {}", id, event.kind(), e);
    }
    let record = NotificationRecord {
        event: event.kind().to_string(),
        delivered: outcome.is_ok(),
        detail: outcome.as_ref().err().map(|e| e.to_string()),
        at: Utc::now(),
    };
    inner
        .store
        .update(id, |b| {
            if let Err(e) = &outcome {
                b.push_error(format!("notification {} failed: {}", event.kind(), e));
            }
            b.push_notification(record);
        })
        .await;
}

/// Take the next record, render it and record the result, until the queue
/// is empty or the batch stops dispatching.
async fn worker_loop(ctx: Arc<RunContext>, queue: Arc<Mutex<RecordStream>>) {
    loop {
        if ctx.token.is_cancelled() || ctx.abort_reason().is_some() {
            break;
        }
        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
        let Some(item) = next else {
            break;
        };
        let result = match item {
            Ok(record) => match ctx.process(record).await {
                Some(result) => result,
                None => continue,
            },
            Err(row_error) => {
                warn!("Batch {} row {} unreadable: {}", ctx.id, row_error.row_index, row_error.message);
                DocumentResult::failed(
                    row_error.row_index,
                    RenderError::Record(row_error.message).to_string(),
                    Utc::now(),
                )
            }
        };
        ctx.append(result).await;
    }
}

/// Drive one batch from `pending` to a terminal state.
///
/// Announces the accepted batch, waits for a batch slot (or cancellation),
/// runs the worker pool and finishes the batch. All notifications of the
/// batch are delivered before `done` is signalled.
///
/// # Arguments
/// * `inner` - The engine internals shared with every batch.
/// * `job` - The accepted batch; its records are consumed here.
pub(super) async fn run(inner: Arc<EngineInner>, job: BatchJob) {
    let BatchJob {
        id,
        template,
        options,
        records,
        pipeline,
        notify,
        token,
        done,
    } = job;

    let outbox = Outbox::open(inner.clone(), id.clone(), notify);
    if let Some(event) = progress_event(&inner, &id, pipeline.width).await {
        post_progress(&outbox.events, &id, event);
    }

    let permit = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        permit = inner.batch_slots.clone().acquire_owned() => permit.ok(),
    };
    let started = match permit {
        Some(_) => inner
            .store
            .update(&id, |b| b.status() == BatchStatus::Pending && b.start(Utc::now()).is_ok())
            .await
            .unwrap_or(false),
        None => false,
    };

    let mut terminal = None;
    if started {
        info!("Batch {} processing with {} workers", id, pipeline.width);
        let ctx = Arc::new(RunContext {
            out_dir: inner.working_dir(&id).join(OUTPUT_DIR),
            inner: inner.clone(),
            total: records.len(),
            id: id.clone(),
            template,
            options,
            retry: pipeline.retry,
            width: pipeline.width,
            token,
            events: outbox.sender(),
            abort: Mutex::new(None),
        });
        execute(&ctx, records).await;
        terminal = finish(&ctx).await;
    } else {
        debug!("Batch {} ended before it started", id);
    }
    outbox.close(&id, terminal).await;
    if started {
        record_in_ledger(&inner, &id).await;
    }
    drop(permit);

    inner.running().remove(&id);
    let _ = done.send(true);
}

/// Run `width` workers over one source-ordered queue until it is drained,
/// cancelled or aborted. Returns once every worker has retired.
async fn execute(ctx: &Arc<RunContext>, records: RecordStream) {
    if let Err(e) = tokio::fs::create_dir_all(&ctx.out_dir).await {
        ctx.set_abort(format!("working directory unavailable: {}", e));
        return;
    }
    let queue = Arc::new(Mutex::new(records));
    let mut workers = JoinSet::new();
    for _ in 0..ctx.width {
        workers.spawn(worker_loop(ctx.clone(), queue.clone()));
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!("Batch {} worker task failed: {}", ctx.id, e);
            ctx.set_abort(format!("worker task failed: {}", e));
        }
    }
}

/// Terminal transition and archive. Returns the event to announce the
/// outcome with; a cancelled batch has none.
async fn finish(ctx: &RunContext) -> Option<BatchEvent> {
    let inner = &ctx.inner;
    let id = ctx.id.as_str();

    if ctx.token.is_cancelled() {
        let cancelled = inner.store.update(id, |b| b.cancel(Utc::now())).await;
        if let Some(Err(e)) = cancelled {
            error!("Batch {} could not be cancelled: {}", id, e);
        }
        info!("Batch {} cancelled", id);
        return None;
    }

    match ctx.abort_reason() {
        Some(reason) => fail(ctx, format!("batch aborted: {}", reason), true).await,
        None => {
            let documents = inner
                .store
                .read(id, |b| b.completed_documents())
                .await
                .unwrap_or_default();
            if documents.is_empty() {
                fail(ctx, format!("all {} documents failed", ctx.total), false).await
            } else {
                match build_archive(ctx, documents).await {
                    Ok(summary) => complete(ctx, summary).await,
                    Err(reason) => fail(ctx, reason, false).await,
                }
            }
        }
    }
}

async fn build_archive(
    ctx: &RunContext,
    documents: Vec<(String, PathBuf)>,
) -> Result<ArchiveSummary, String> {
    let dir = ctx.inner.working_dir(&ctx.id);
    tokio::task::spawn_blocking(move || archive::build(&dir, &documents))
        .await
        .map_err(|e| format!("archive task failed: {}", e))?
        .map_err(|e| format!("archive build failed: {}", e))
}

async fn complete(ctx: &RunContext, summary: ArchiveSummary) -> Option<BatchEvent> {
    let id = ctx.id.as_str();
    let completed = ctx
        .inner
        .store
        .update(id, |b| b.complete(summary.path.clone(), Utc::now()).map(|_| b.summary()))
        .await?;
    match completed {
        Ok(batch_summary) => {
            info!(
                "Batch {} completed: {} of {} documents, {} bytes archived",
                id, batch_summary.totals.completed, batch_summary.totals.total, summary.size_bytes
            );
            Some(BatchEvent::BatchCompleted {
                summary: batch_summary,
                archive: ArchiveRef {
                    file_name: ARCHIVE_NAME.to_string(),
                    size_bytes: summary.size_bytes,
                    documents: summary.documents,
                },
                download_links: vec![ctx.inner.download_link(id)],
            })
        }
        Err(e) => {
            error!("Batch {} could not complete: {}", id, e);
            fail(ctx, format!("completion refused: {}", e), true).await
        }
    }
}

/// Move the batch to `failed`. With `fill`, rows without a result are
/// recorded as failed with the same reason first.
async fn fail(ctx: &RunContext, reason: String, fill: bool) -> Option<BatchEvent> {
    let id = ctx.id.as_str();
    error!("Batch {} failed: {}", id, reason);
    let now = Utc::now();
    let (summary, error_summary) = ctx
        .inner
        .store
        .update(id, |b| {
            if fill {
                b.fail_unprocessed(&reason, now);
            }
            if let Err(e) = b.fail(reason.clone(), now) {
                error!("Batch {} could not be failed: {}", id, e);
            }
            let mut lines = vec![reason.clone()];
            lines.extend(b.record_errors().into_iter().take(ERROR_SUMMARY_LINES));
            (b.summary(), lines.join("\n"))
        })
        .await?;
    if summary.status != BatchStatus::Failed {
        return None;
    }
    Some(BatchEvent::BatchFailed {
        summary,
        error_summary,
    })
}

async fn record_in_ledger(inner: &EngineInner, id: &str) {
    let Some(ledger) = &inner.ledger else {
        return;
    };
    let Some(snapshot) = inner.store.get(id, None).await else {
        return;
    };
    if let Err(e) = ledger.run(move |l| l.record(&snapshot)).await {
        warn!("Batch {} not written to the ledger: {}", id, e);
    }
}
