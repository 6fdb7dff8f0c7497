use crate::jobs::BatchStatus;
use crate::model::batch::BatchSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who to tell when a batch finishes. Only the delivery layer reads this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationTarget {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Optional `templateOptions` part of a submission.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct TemplateSettings {
    /// Display name; defaults to the uploaded file name.
    pub name: Option<String>,
    /// Placeholders that may be missing from the data source.
    pub optional: Vec<String>,
}

/// Optional `sourceOptions` part of a submission or verification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SourceSettings {
    pub has_headers: bool,
    pub keep_empty_rows: bool,
    /// Single-character delimiter overriding detection; `"\t"` for tab.
    pub delimiter: Option<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            has_headers: true,
            keep_empty_rows: false,
            delimiter: None,
        }
    }
}

/// Query string of `GET /api/batches`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BatchListQuery {
    pub status: Option<BatchStatus>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// Query string of `GET /api/batches/{id}`: window over the results.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ResultsWindow {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// Body returned by a successful submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub batch: BatchSnapshot,
    pub estimated_completion_at: DateTime<Utc>,
}
