//! Terminal and progress events handed to notification sinks.
//!
//! Events carry batch identifiers and counts only. The recipient of a
//! delivery travels separately as a `NotificationTarget`.

use crate::model::batch::BatchSummary;
use serde::{Deserialize, Serialize};

/// Reference to a materialised archive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRef {
    pub file_name: String,
    pub size_bytes: u64,
    pub documents: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BatchEvent {
    BatchCompleted {
        summary: BatchSummary,
        archive: ArchiveRef,
        download_links: Vec<String>,
    },
    BatchFailed {
        summary: BatchSummary,
        error_summary: String,
    },
    BatchProgress {
        summary: BatchSummary,
        estimated_remaining_ms: u64,
    },
}

impl BatchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BatchEvent::BatchCompleted { .. } => "batch_completed",
            BatchEvent::BatchFailed { .. } => "batch_failed",
            BatchEvent::BatchProgress { .. } => "batch_progress",
        }
    }

    pub fn summary(&self) -> &BatchSummary {
        match self {
            BatchEvent::BatchCompleted { summary, .. }
            | BatchEvent::BatchFailed { summary, .. }
            | BatchEvent::BatchProgress { summary, .. } => summary,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchEvent::BatchProgress { .. })
    }
}
