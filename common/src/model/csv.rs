use crate::model::place_holder::PlaceholderType;
use serde::{Deserialize, Serialize};

/// Inferred schema of a single data source column.
///
/// Produced by the verification endpoint from the header row and the
/// first data row, so a caller can review column types before submitting
/// a batch against the same file.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ColumnCheck {
    pub title: String,
    pub placeholder_type: PlaceholderType,
    /// Raw value from the first data row, as a concrete example.
    pub first_row: Option<String>,
}

/// First cell that does not fit its inferred column type.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct InvalidCell {
    /// 1-based data row index.
    pub row_index: usize,
    pub column: String,
    pub value: String,
}

/// Result of verifying an uploaded data source.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SourceReport {
    pub encoding: String,
    pub delimiter: String,
    pub headers: Vec<String>,
    pub rows: usize,
    pub md5: String,
    pub columns: Vec<ColumnCheck>,
    pub first_invalid: Option<InvalidCell>,
}
