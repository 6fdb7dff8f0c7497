use crate::jobs::BatchStatus;
use crate::model::options::OutputFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Document counts of a batch. `completed + failed <= total` always holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTotals {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchTotals {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }

    /// `⌊processed · 100 / total⌋`, 0 for an empty batch.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.processed() * 100) / self.total).min(100) as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Completed,
    Failed,
}

/// Outcome of rendering one record. Exactly one of `file_path`/`error` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResult {
    pub row_index: usize,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub produced_at: DateTime<Utc>,
}

impl DocumentResult {
    pub fn completed(
        row_index: usize,
        file_name: String,
        file_path: PathBuf,
        file_size: u64,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            row_index,
            status: DocumentStatus::Completed,
            file_name: Some(file_name),
            file_path: Some(file_path),
            file_size: Some(file_size),
            error: None,
            produced_at,
        }
    }

    pub fn failed(row_index: usize, error: String, produced_at: DateTime<Utc>) -> Self {
        Self {
            row_index,
            status: DocumentStatus::Failed,
            file_name: None,
            file_path: None,
            file_size: None,
            error: Some(error),
            produced_at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == DocumentStatus::Completed
    }
}

/// Delivery record of one notifier event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub event: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Read-only view of a batch handed to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub id: String,
    pub status: BatchStatus,
    pub progress: u8,
    pub totals: BatchTotals,
    pub template_name: String,
    pub format: OutputFormat,
    /// Results in ascending `row_index`; may be a window (see `results_offset`).
    pub results: Vec<DocumentResult>,
    pub results_offset: usize,
    pub errors: Vec<String>,
    pub errors_dropped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,
    pub notifications: Vec<NotificationRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_requested_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion_at: Option<DateTime<Utc>>,
}

impl BatchSnapshot {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            totals: self.totals,
            created_at: self.created_at,
        }
    }

    /// Timestamp of the terminal transition, if any.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.failed_at).or(self.cancelled_at)
    }
}

/// Identifiers and counts only; safe to hand to any sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: String,
    pub status: BatchStatus,
    pub progress: u8,
    pub totals: BatchTotals,
    pub created_at: DateTime<Utc>,
}

/// One page of the batch listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPage {
    pub items: Vec<BatchSummary>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_floors() {
        let totals = BatchTotals {
            total: 3,
            completed: 1,
            failed: 0,
        };
        assert_eq!(totals.percent(), 33);
        assert_eq!(BatchTotals::new(0).percent(), 0);
    }

    #[test]
    fn failed_result_has_no_file() {
        let r = DocumentResult::failed(4, "boom".into(), Utc::now());
        assert!(r.file_path.is_none());
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert!(!r.is_completed());
    }
}
