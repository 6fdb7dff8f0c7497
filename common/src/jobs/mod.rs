use crate::model::batch::BatchTotals;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a batch.
///
/// ```text
/// pending ──▶ processing ──▶ completed | failed
///    └──────────────┴──────▶ cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }

    /// Position in the state machine; a later observation of the same
    /// batch never has a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            BatchStatus::Pending => 0,
            BatchStatus::Processing => 1,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            "cancelled" => Ok(BatchStatus::Cancelled),
            other => Err(format!("unknown batch status '{}'", other)),
        }
    }
}

/// Progress observation published on a batch's channel after every
/// state change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub batch_id: String,
    pub status: BatchStatus,
    pub progress: u8,
    pub totals: BatchTotals,
    pub observed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!BatchStatus::Pending.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(BatchStatus::Completed.rank() > BatchStatus::Processing.rank());
    }

    #[test]
    fn parses_lowercase_names() {
        assert_eq!("failed".parse::<BatchStatus>(), Ok(BatchStatus::Failed));
        assert!("done".parse::<BatchStatus>().is_err());
    }
}
