//! Plain-text e-mail notifications.
//!
//! Messages are composed here and handed to a [`MailTransport`]. The shipped
//! transport drops RFC 5322 files into a pickup directory, where a local MTA
//! or a relay process collects them.

use super::{Notifier, NotifyError};
use async_trait::async_trait;
use chrono::Utc;
use common::events::BatchEvent;
use common::requests::NotificationTarget;
use log::debug;
use std::fmt::Write as _;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl MailMessage {
    pub fn to_rfc5322(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "Date: {}\r\n", Utc::now().to_rfc2822());
        let _ = write!(out, "From: {}\r\n", self.from);
        let _ = write!(out, "To: {}\r\n", self.to);
        let _ = write!(out, "Subject: {}\r\n", self.subject);
        let _ = write!(out, "Message-ID: <{}@docbatch>\r\n", Uuid::new_v4());
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        out.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
        for line in self.body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError>;
}

/// Writes each message as `<uuid>.eml` into a directory.
#[derive(Debug, Clone)]
pub struct PickupDirTransport {
    dir: PathBuf,
}

impl PickupDirTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MailTransport for PickupDirTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.eml", Uuid::new_v4()));
        tokio::fs::write(&path, message.to_rfc5322()).await?;
        debug!("Queued mail to {} at {}", message.to, path.display());
        Ok(())
    }
}

pub struct EmailNotifier<T: MailTransport> {
    from: String,
    transport: T,
}

impl<T: MailTransport> EmailNotifier<T> {
    pub fn new(from: impl Into<String>, transport: T) -> Self {
        Self {
            from: from.into(),
            transport,
        }
    }

    pub fn compose(&self, event: &BatchEvent, target: &NotificationTarget) -> MailMessage {
        let summary = event.summary();
        let to = match &target.name {
            Some(name) => format!("{} <{}>", name, target.email),
            None => target.email.clone(),
        };
        let greeting = target.name.as_deref().unwrap_or("Hello");
        let totals = summary.totals;
        let (subject, details) = match event {
            BatchEvent::BatchCompleted {
                archive,
                download_links,
                ..
            } => (
                format!("Batch {} is ready", summary.batch_id),
                format!(
                    "{} of {} documents were generated ({} failed).\n\
                     Archive: {} ({} bytes)\n\n{}",
                    totals.completed,
                    totals.total,
                    totals.failed,
                    archive.file_name,
                    archive.size_bytes,
                    download_links.join("\n")
                ),
            ),
            BatchEvent::BatchFailed { error_summary, .. } => (
                format!("Batch {} failed", summary.batch_id),
                format!(
                    "{} of {} documents failed.\n\n{}",
                    totals.failed, totals.total, error_summary
                ),
            ),
            BatchEvent::BatchProgress {
                estimated_remaining_ms,
                ..
            } => (
                format!("Batch {} is {}% done", summary.batch_id, summary.progress),
                format!(
                    "{} of {} documents processed, about {} seconds remaining.",
                    totals.processed(),
                    totals.total,
                    estimated_remaining_ms / 1000
                ),
            ),
        };
        MailMessage {
            from: self.from.clone(),
            to,
            subject,
            body: format!("{},\n\n{}\n", greeting, details),
        }
    }
}

#[async_trait]
impl<T: MailTransport> Notifier for EmailNotifier<T> {
    /// Without a recipient there is nobody to mail; that is not a failure.
    async fn notify(
        &self,
        event: &BatchEvent,
        target: Option<&NotificationTarget>,
    ) -> Result<(), NotifyError> {
        let Some(target) = target else {
            return Ok(());
        };
        self.transport.send(&self.compose(event, target)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::events::ArchiveRef;
    use common::jobs::BatchStatus;
    use common::model::batch::{BatchSummary, BatchTotals};

    fn completed() -> BatchEvent {
        BatchEvent::BatchCompleted {
            summary: BatchSummary {
                batch_id: "b-1".into(),
                status: BatchStatus::Completed,
                progress: 100,
                totals: BatchTotals {
                    total: 3,
                    completed: 2,
                    failed: 1,
                },
                created_at: Utc::now(),
            },
            archive: ArchiveRef {
                file_name: "archive.zip".into(),
                size_bytes: 42,
                documents: 2,
            },
            download_links: vec!["http://host/api/batches/b-1/download".into()],
        }
    }

    #[tokio::test]
    async fn writes_eml_files_for_recipients_only() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = EmailNotifier::new("docbatch@example.com", PickupDirTransport::new(dir.path()));
        notifier.notify(&completed(), None).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let target = NotificationTarget {
            email: "ana@example.com".into(),
            name: Some("Ana".into()),
        };
        notifier.notify(&completed(), Some(&target)).await.unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let text = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(text.contains("To: Ana <ana@example.com>\r\n"));
        assert!(text.contains("Subject: Batch b-1 is ready\r\n"));
        assert!(text.contains("2 of 3 documents were generated (1 failed)."));
        assert!(text.contains("/api/batches/b-1/download"));
    }
}
