//! Record source: turns an uploaded tabular file into a lazy stream of records.
//!
//! Parsing happens in two passes over the decoded text. The first pass runs
//! inside [`parse`]: it locates the header row, validates it, enforces the
//! row limit and counts the records, so a bad upload is rejected before any
//! batch exists. The second pass is the returned [`RecordStream`], which
//! cleans and yields one record at a time and can only be consumed once.

pub mod cells;
pub mod delimiter;
pub mod encoding;

use common::model::record::Record;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use encoding::SourceEncoding;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_MAX_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_MAX_ROWS: usize = 100_000;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("data source too large: {0}")]
    TooLarge(String),
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("column {0} has an empty header")]
    EmptyColumn(usize),
    #[error("data source has no header row")]
    MissingHeader,
    #[error("unsupported encoding: no candidate decodes the first 8 KiB cleanly")]
    UnsupportedEncoding,
    #[error("malformed data source: {0}")]
    Malformed(#[from] csv::Error),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::TooLarge(_) => "SourceTooLarge",
            SourceError::DuplicateColumn(_) => "DuplicateColumn",
            SourceError::EmptyColumn(_) => "EmptyColumn",
            SourceError::MissingHeader => "MissingHeader",
            SourceError::UnsupportedEncoding => "UnsupportedEncoding",
            SourceError::Malformed(_) => "MalformedSource",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Take column names from the first non-empty row. When false, columns
    /// are named `column_1..column_n`.
    pub has_headers: bool,
    pub keep_empty_rows: bool,
    /// Skip detection and use this delimiter.
    pub delimiter: Option<u8>,
    pub max_bytes: usize,
    pub max_rows: usize,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            has_headers: true,
            keep_empty_rows: false,
            delimiter: None,
            max_bytes: DEFAULT_MAX_BYTES,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceMetadata {
    pub encoding: SourceEncoding,
    pub had_bom: bool,
    #[serde(serialize_with = "serialize_delimiter")]
    pub delimiter: u8,
    pub byte_len: usize,
    pub rows: usize,
    /// md5 of the raw upload, hex.
    pub md5: String,
}

fn serialize_delimiter<S: serde::Serializer>(d: &u8, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&delimiter::display(*d))
}

pub struct ParsedSource {
    pub headers: Vec<String>,
    pub records: RecordStream,
    pub metadata: SourceMetadata,
}

/// A row that could not become a record. Rendering it fails with a
/// record error; the batch carries on.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub row_index: usize,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row_index, self.message)
    }
}

type RawRows = StringRecordsIntoIter<Cursor<Arc<[u8]>>>;

/// Lazy, finite, single-use sequence of records in source order.
pub struct RecordStream {
    rows: RawRows,
    headers: Arc<[String]>,
    keep_empty_rows: bool,
    /// Raw rows still to skip before the first data row (leading blanks and
    /// the header itself).
    skip: usize,
    next_index: usize,
    remaining: usize,
}

impl RecordStream {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Records not yet yielded.
    pub fn len(&self) -> usize {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.skip > 0 {
            self.rows.next()?;
            self.skip -= 1;
        }
        loop {
            let raw = self.rows.next()?;
            let row_index = self.next_index;
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    self.next_index += 1;
                    self.remaining = self.remaining.saturating_sub(1);
                    return Some(Err(RowError {
                        row_index,
                        message: e.to_string(),
                    }));
                }
            };
            if !self.keep_empty_rows && is_blank(&raw) {
                continue;
            }
            self.next_index += 1;
            self.remaining = self.remaining.saturating_sub(1);
            return Some(build_record(&self.headers, row_index, &raw));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for RecordStream {}

fn build_record(headers: &[String], row_index: usize, raw: &StringRecord) -> Result<Record, RowError> {
    if raw.len() > headers.len() {
        let line = raw
            .position()
            .map(|p| format!(" (line {})", p.line()))
            .unwrap_or_default();
        return Err(RowError {
            row_index,
            message: format!(
                "row has {} fields but the header has {}{}",
                raw.len(),
                headers.len(),
                line
            ),
        });
    }
    let values: BTreeMap<_, _> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), cells::clean(raw.get(i).unwrap_or(""))))
        .collect();
    Ok(Record::new(row_index, values))
}

fn is_blank(raw: &StringRecord) -> bool {
    raw.iter()
        .all(|field| field.replace('\u{00A0}', " ").trim().is_empty())
}

fn reader(data: &Arc<[u8]>, delimiter: u8) -> csv::Reader<Cursor<Arc<[u8]>>> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(Cursor::new(Arc::clone(data)))
}

/// Parse an uploaded data source.
pub fn parse(bytes: &[u8], options: &SourceOptions) -> Result<ParsedSource, SourceError> {
    if bytes.len() > options.max_bytes {
        return Err(SourceError::TooLarge(format!(
            "{} bytes exceeds the limit of {} bytes",
            bytes.len(),
            options.max_bytes
        )));
    }
    let md5 = format!("{:x}", md5::compute(bytes));
    let decoded = encoding::decode(bytes)?;
    let delimiter = options
        .delimiter
        .unwrap_or_else(|| delimiter::detect(&decoded.text));
    let data: Arc<[u8]> = Arc::from(decoded.text.into_bytes());

    let scan = scan(&data, delimiter, options)?;
    let headers = if options.has_headers {
        validate_headers(scan.header.as_ref().ok_or(SourceError::MissingHeader)?)?
    } else {
        (1..=scan.max_fields).map(|i| format!("column_{}", i)).collect()
    };

    let metadata = SourceMetadata {
        encoding: decoded.encoding,
        had_bom: decoded.had_bom,
        delimiter,
        byte_len: bytes.len(),
        rows: scan.rows,
        md5,
    };
    let records = RecordStream {
        rows: reader(&data, delimiter).into_records(),
        headers: headers.clone().into(),
        keep_empty_rows: options.keep_empty_rows,
        skip: scan.skip,
        next_index: 1,
        remaining: scan.rows,
    };
    Ok(ParsedSource {
        headers,
        records,
        metadata,
    })
}

struct Scan {
    header: Option<StringRecord>,
    skip: usize,
    rows: usize,
    max_fields: usize,
}

/// First pass: find the header, count data rows, enforce the row limit.
fn scan(data: &Arc<[u8]>, delimiter: u8, options: &SourceOptions) -> Result<Scan, SourceError> {
    let mut rdr = reader(data, delimiter);
    let mut header = None;
    let mut skip = 0;
    let mut rows = 0;
    let mut max_fields = 0;

    for raw in rdr.records() {
        let raw = raw?;
        if options.has_headers && header.is_none() {
            skip += 1;
            if !is_blank(&raw) {
                header = Some(raw);
            }
            continue;
        }
        if !options.keep_empty_rows && is_blank(&raw) {
            continue;
        }
        rows += 1;
        max_fields = max_fields.max(raw.len());
        if rows > options.max_rows {
            return Err(SourceError::TooLarge(format!(
                "more than {} rows",
                options.max_rows
            )));
        }
    }
    if !options.has_headers {
        // Leading blank lines are only skipped as part of the header search.
        skip = 0;
    }
    Ok(Scan {
        header,
        skip,
        rows,
        max_fields,
    })
}

fn validate_headers(raw: &StringRecord) -> Result<Vec<String>, SourceError> {
    let mut seen = HashSet::new();
    let mut headers = Vec::with_capacity(raw.len());
    for (i, cell) in raw.iter().enumerate() {
        let name = cell.replace('\u{00A0}', " ").trim().to_string();
        if name.is_empty() {
            return Err(SourceError::EmptyColumn(i + 1));
        }
        if !seen.insert(name.clone()) {
            return Err(SourceError::DuplicateColumn(name));
        }
        headers.push(name);
    }
    Ok(headers)
}
