use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single cleaned cell from a tabular data source.
///
/// Serialized untagged so a record reads as a plain JSON object
/// (`{"name": "A", "amount": 1, "vip": true, "note": null}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// Substitution form of a cell: plain decimal numbers, `true`/`false`,
/// and the empty string for null.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// One row of the data source, the unit of rendering.
///
/// `row_index` is 1-based and counts only the records the source yields,
/// so a batch of `n` records always spans `1..=n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub row_index: usize,
    pub values: BTreeMap<String, CellValue>,
}

impl Record {
    pub fn new(row_index: usize, values: BTreeMap<String, CellValue>) -> Self {
        Self { row_index, values }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.values.get(column)
    }

    /// True when every cell is null (a blank line in the source).
    pub fn is_blank(&self) -> bool {
        self.values.values().all(CellValue::is_null)
    }
}
