//! Batch engine: accepts submissions, runs batches, answers queries.
//!
//! A submission is validated, stored as a `pending` batch and handed to a
//! background task (see `worker`). That task waits for one of the
//! `max_concurrent_batches` slots, renders every record through a bounded
//! pool of workers, builds the archive and notifies. Everything callers
//! observe goes through the [`state::BatchStore`].

pub mod archive;
pub mod cancel;
pub mod ledger;
pub mod ratelimit;
pub mod retention;
pub mod state;
mod worker;

use crate::config::EngineConfig;
use crate::error::{EngineError, SubmitError};
use crate::notify::Notifier;
use crate::render::resilient::{ResilientRenderer, RetryPolicy};
use crate::render::Renderer;
use crate::source::{ParsedSource, SourceOptions};
use crate::template::TemplateModel;
use cancel::CancellationToken;
use chrono::Utc;
use common::jobs::{BatchProgress, BatchStatus};
use common::model::batch::{BatchPage, BatchSnapshot};
use common::model::options::OutputOptions;
use common::requests::{NotificationTarget, SubmitResponse};
use ledger::BatchLedger;
use log::{info, warn};
use ratelimit::RateLimiter;
use state::{Batch, BatchFilter, BatchStore, Removal};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Semaphore};
use uuid::Uuid;

pub const MAX_RETRY_ATTEMPTS: u32 = 10;
pub const MAX_RETRY_BASE_DELAY_MS: u64 = 60_000;

/// Everything needed to start a batch.
pub struct Submission {
    /// Use this id instead of generating one (the HTTP layer stages uploads
    /// under the id before submitting).
    pub batch_id: Option<String>,
    pub template: TemplateModel,
    pub source: ParsedSource,
    pub options: OutputOptions,
    pub notify: Option<NotificationTarget>,
}

/// Collaborators of the engine.
pub struct EngineDeps {
    pub renderer: Arc<dyn Renderer>,
    pub notifier: Arc<dyn Notifier>,
    pub ledger: Option<BatchLedger>,
    /// Prefix for download links in notifications.
    pub public_base_url: String,
}

/// Worker count and retry policy of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    pub width: usize,
    pub retry: RetryPolicy,
}

struct RunHandle {
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

struct EngineInner {
    config: EngineConfig,
    store: BatchStore,
    renderer: ResilientRenderer,
    notifier: Arc<dyn Notifier>,
    ledger: Option<BatchLedger>,
    public_base_url: String,
    batch_slots: Arc<Semaphore>,
    running: Mutex<HashMap<String, RunHandle>>,
}

impl EngineInner {
    fn running(&self) -> MutexGuard<'_, HashMap<String, RunHandle>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn working_dir(&self, id: &str) -> PathBuf {
        self.config.working_root.join(id)
    }

    fn download_link(&self, id: &str) -> String {
        format!(
            "{}/api/batches/{}/download",
            self.public_base_url.trim_end_matches('/'),
            id
        )
    }

    /// Time to render `remaining` documents with `width` workers under the
    /// shared rate limit.
    fn estimate(&self, remaining: usize, width: usize) -> Duration {
        let per_worker = self.config.estimated_render_ms as f64 / width.max(1) as f64;
        let rate = &self.config.rate_limit;
        let per_token = rate.window_ms as f64 / rate.requests.max(1) as f64;
        Duration::from_millis((remaining as f64 * per_worker.max(per_token)).ceil() as u64)
    }
}

#[derive(Clone)]
pub struct BatchEngine {
    inner: Arc<EngineInner>,
}

impl BatchEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.requests,
            config.rate_limit.window(),
        ));
        let renderer = ResilientRenderer::new(deps.renderer, limiter, config.render_timeout());
        let batch_slots = Arc::new(Semaphore::new(config.max_concurrent_batches.max(1)));
        Self {
            inner: Arc::new(EngineInner {
                store: BatchStore::new(config.observation_capacity),
                config,
                renderer,
                notifier: deps.notifier,
                ledger: deps.ledger,
                public_base_url: deps.public_base_url,
                batch_slots,
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &BatchStore {
        &self.inner.store
    }

    pub fn ledger(&self) -> Option<&BatchLedger> {
        self.inner.ledger.as_ref()
    }

    /// Directory holding everything of batch `id`.
    pub fn working_dir(&self, id: &str) -> PathBuf {
        self.inner.working_dir(id)
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            max_bytes: self.inner.config.max_source_bytes,
            max_rows: self.inner.config.max_source_rows,
            ..SourceOptions::default()
        }
    }

    /// Resolve the submission's pipeline knobs against the engine defaults.
    pub fn pipeline(&self, options: &OutputOptions, total: usize) -> Result<Pipeline, SubmitError> {
        let config = &self.inner.config;
        let requested = options.batch_size.unwrap_or(config.default_batch_size);
        if requested == 0 {
            return Err(SubmitError::InvalidOptions(
                "batchSize must be at least 1".to_string(),
            ));
        }
        let attempts = options.retry_attempts.unwrap_or(config.default_retry_attempts);
        if attempts > MAX_RETRY_ATTEMPTS {
            return Err(SubmitError::InvalidOptions(format!(
                "retryAttempts must be at most {}",
                MAX_RETRY_ATTEMPTS
            )));
        }
        let base_delay_ms = options
            .retry_base_delay_ms
            .unwrap_or(config.default_retry_base_delay_ms);
        if base_delay_ms == 0 {
            return Err(SubmitError::InvalidOptions(
                "retryBaseDelay must be positive".to_string(),
            ));
        }
        if base_delay_ms > MAX_RETRY_BASE_DELAY_MS {
            return Err(SubmitError::InvalidOptions(format!(
                "retryBaseDelay must be at most {} ms",
                MAX_RETRY_BASE_DELAY_MS
            )));
        }
        if options.watermark.as_deref().is_some_and(|w| w.contains('\n')) {
            return Err(SubmitError::InvalidOptions(
                "watermark must be a single line".to_string(),
            ));
        }

        let cap = config
            .max_concurrent_per_batch
            .min(config.rate_limit.requests)
            .min(total)
            .max(1);
        Ok(Pipeline {
            width: requested.clamp(1, cap),
            retry: RetryPolicy {
                attempts,
                base_delay: Duration::from_millis(base_delay_ms),
            },
        })
    }

    /// Validate and enqueue a batch. Nothing is stored when this fails.
    pub async fn submit(&self, submission: Submission) -> Result<SubmitResponse, SubmitError> {
        let Submission {
            batch_id,
            template,
            source,
            options,
            notify,
        } = submission;

        let missing = template.missing_from(&source.headers);
        if !missing.is_empty() {
            return Err(SubmitError::SchemaMismatch { missing });
        }
        self.inner
            .renderer
            .supports(&template, &options)
            .map_err(SubmitError::UnsupportedFormat)?;
        let total = source.records.len();
        if total == 0 {
            return Err(SubmitError::EmptySource);
        }
        let pipeline = self.pipeline(&options, total)?;

        let id = batch_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let estimate = self.inner.estimate(total, pipeline.width);
        let estimated_completion_at =
            now + chrono::Duration::from_std(estimate).unwrap_or(chrono::Duration::zero());

        let mut batch = Batch::new(
            id.clone(),
            total,
            template.name().to_string(),
            options.format,
            self.inner.working_dir(&id),
            self.inner.config.max_errors_per_batch,
            now,
        );
        batch.set_estimated_completion(estimated_completion_at);
        if !self.inner.store.create(batch).await {
            return Err(SubmitError::DuplicateBatch(id));
        }
        let snapshot = self
            .inner
            .store
            .get(&id, None)
            .await
            .ok_or_else(|| SubmitError::DuplicateBatch(id.clone()))?;

        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.inner.running().insert(
            id.clone(),
            RunHandle {
                token: token.clone(),
                done: done_rx,
            },
        );
        info!(
            "Batch {} accepted: {} records, template '{}', {} output, {} workers",
            id,
            total,
            template.name(),
            options.format.extension(),
            pipeline.width
        );

        let job = worker::BatchJob {
            id,
            template: Arc::new(template),
            options: Arc::new(options),
            records: source.records,
            pipeline,
            notify,
            token,
            done: done_tx,
        };
        tokio::spawn(worker::run(self.inner.clone(), job));

        Ok(SubmitResponse {
            batch: snapshot,
            estimated_completion_at,
        })
    }

    /// Snapshot of a batch, optionally with only a window of its results.
    pub async fn status(
        &self,
        id: &str,
        window: Option<(usize, usize)>,
    ) -> Result<BatchSnapshot, EngineError> {
        if let Some(snapshot) = self.inner.store.get(id, window).await {
            return Ok(snapshot);
        }
        match self.from_ledger(id).await? {
            Some(mut snapshot) => {
                if let Some((offset, limit)) = window {
                    snapshot.results = snapshot
                        .results
                        .into_iter()
                        .skip(offset)
                        .take(limit)
                        .collect();
                    snapshot.results_offset = offset;
                }
                Ok(snapshot)
            }
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    async fn from_ledger(&self, id: &str) -> Result<Option<BatchSnapshot>, EngineError> {
        let Some(ledger) = &self.inner.ledger else {
            return Ok(None);
        };
        let id = id.to_string();
        Ok(ledger.run(move |l| l.load(&id)).await?)
    }

    pub async fn list(&self, status: Option<BatchStatus>, offset: usize, limit: usize) -> BatchPage {
        self.inner
            .store
            .list(&BatchFilter { status }, offset, limit)
            .await
    }

    /// Cancel a batch. Pending batches end immediately; processing batches
    /// stop dispatching and end once in-flight records are done; terminal
    /// batches are left untouched.
    pub async fn cancel(&self, id: &str) -> Result<BatchSnapshot, EngineError> {
        let now = Utc::now();
        let status = self
            .inner
            .store
            .update(id, |b| {
                match b.status() {
                    BatchStatus::Pending => {
                        if let Err(e) = b.cancel(now) {
                            warn!("Batch {} cancel failed: {}", b.id(), e);
                        }
                    }
                    BatchStatus::Processing => {
                        b.request_cancel(now);
                    }
                    _ => {}
                }
                b.status()
            })
            .await;
        let Some(status) = status else {
            return self.status(id, None).await;
        };
        self.signal_cancel(id);
        match status {
            BatchStatus::Cancelled => info!("Batch {} cancelled", id),
            BatchStatus::Processing => info!("Batch {} cancellation requested", id),
            other => info!("Batch {} already {}, cancel ignored", id, other.as_str()),
        }
        self.status(id, None).await
    }

    /// Path of the archive of a completed batch.
    pub async fn archive_path(&self, id: &str) -> Result<PathBuf, EngineError> {
        let snapshot = self.status(id, Some((0, 0))).await?;
        match (snapshot.status, snapshot.archive_path) {
            (BatchStatus::Completed, Some(path))
                if tokio::fs::try_exists(&path).await.unwrap_or(false) =>
            {
                Ok(path)
            }
            _ => Err(EngineError::NotReady(id.to_string())),
        }
    }

    /// Remove a batch and its files. A processing batch is refused; a pending
    /// one is cancelled first.
    pub async fn delete(&self, id: &str) -> Result<(), EngineError> {
        let removal = self
            .inner
            .store
            .remove_if(id, |b| b.status() != BatchStatus::Processing)
            .await;
        if let Removal::Refused(_) = removal {
            return Err(EngineError::Busy(id.to_string()));
        }
        let in_ledger = match &self.inner.ledger {
            Some(ledger) => {
                let key = id.to_string();
                ledger.run(move |l| l.delete(&key)).await?
            }
            None => false,
        };
        if removal == Removal::NotFound && !in_ledger {
            return Err(EngineError::NotFound(id.to_string()));
        }
        self.signal_cancel(id);
        let dir = self.inner.working_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("Batch {} deleted", id);
        Ok(())
    }

    fn signal_cancel(&self, id: &str) {
        let token = self.inner.running().get(id).map(|h| h.token.clone());
        if let Some(token) = token {
            token.cancel();
        }
    }

    pub async fn subscribe(&self, id: &str) -> Option<broadcast::Receiver<BatchProgress>> {
        self.inner.store.subscribe(id).await
    }

    /// Wait until the background task of batch `id` has finished (terminal
    /// state reached, archive built, notification delivered).
    pub async fn wait(&self, id: &str) -> Result<BatchSnapshot, EngineError> {
        let done = self.inner.running().get(id).map(|h| h.done.clone());
        if let Some(mut done) = done {
            // A closed channel means the task is gone, which is just as final.
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.status(id, None).await
    }
}
