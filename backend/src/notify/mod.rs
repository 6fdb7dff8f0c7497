//! Delivery of batch events to the outside world.

pub mod email;

use async_trait::async_trait;
use common::events::BatchEvent;
use common::requests::NotificationTarget;
use log::info;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("notification transport: {0}")]
    Transport(String),
    #[error("{}", .0.join("; "))]
    Partial(Vec<String>),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `event`. `target` is the recipient given at submission, if any.
    async fn notify(
        &self,
        event: &BatchEvent,
        target: Option<&NotificationTarget>,
    ) -> Result<(), NotifyError>;
}

/// Writes every event to the application log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        event: &BatchEvent,
        _target: Option<&NotificationTarget>,
    ) -> Result<(), NotifyError> {
        let summary = event.summary();
        match event {
            BatchEvent::BatchCompleted { archive, .. } => info!(
                "Batch {} completed: {} of {} documents, archive {} ({} bytes)",
                summary.batch_id,
                summary.totals.completed,
                summary.totals.total,
                archive.file_name,
                archive.size_bytes
            ),
            BatchEvent::BatchFailed { error_summary, .. } => info!(
                "Batch {} failed: {}",
                summary.batch_id, error_summary
            ),
            BatchEvent::BatchProgress {
                estimated_remaining_ms,
                ..
            } => info!(
                "Batch {} at {}% ({} ms remaining)",
                summary.batch_id, summary.progress, estimated_remaining_ms
            ),
        }
        Ok(())
    }
}

/// Hands each event to every sink; fails if any sink failed.
#[derive(Default, Clone)]
pub struct MultiNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn Notifier>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify(
        &self,
        event: &BatchEvent,
        target: Option<&NotificationTarget>,
    ) -> Result<(), NotifyError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event, target).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Partial(failures))
        }
    }
}
