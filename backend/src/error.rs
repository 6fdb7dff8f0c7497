//! Error taxonomy shared by the engine and the HTTP surface.
//!
//! Three families cross module boundaries:
//! - [`SubmitError`]: validation failures. The submission is rejected and no
//!   batch exists afterwards.
//! - [`RenderError`]: per-record outcomes of the renderer. Contained in a
//!   `DocumentResult`; only `Template` escalates to an engine-fatal failure.
//! - [`EngineError`]: operations on existing batches (not found, busy, I/O).
//!
//! Component-local errors (`SourceError`, `TemplateError`, `ArchiveError`,
//! `NotifyError`, `LedgerError`, `ConfigError`) live next to their modules and
//! convert into these where they cross a boundary.

use crate::job_controller::ledger::LedgerError;
use crate::source::SourceError;
use crate::template::TemplateError;
use std::time::Duration;
use thiserror::Error;

/// Submission rejected before a batch is created.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("template placeholders missing from data source headers: {}", missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid output options: {0}")]
    InvalidOptions(String),
    #[error("data source contains no records")]
    EmptySource,
    #[error("batch '{0}' already exists")]
    DuplicateBatch(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("invalid upload: {0}")]
    Upload(String),
    #[error("staging the submission failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SubmitError {
    /// Stable machine-readable name used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::SchemaMismatch { .. } => "SchemaMismatch",
            SubmitError::UnsupportedFormat(_) => "UnsupportedFormat",
            SubmitError::InvalidOptions(_) => "InvalidOptions",
            SubmitError::EmptySource => "EmptySource",
            SubmitError::DuplicateBatch(_) => "DuplicateBatch",
            SubmitError::Source(e) => e.kind(),
            SubmitError::Template(e) => e.kind(),
            SubmitError::Upload(_) => "InvalidUpload",
            SubmitError::Io(_) => "StagingFailed",
        }
    }

    /// Caller's fault (400) as opposed to a server-side problem (500).
    pub fn is_validation(&self) -> bool {
        !matches!(self, SubmitError::Io(_))
    }
}

/// Failure of a single render call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(String),
    #[error("record error: {0}")]
    Record(String),
    #[error("missing required field '{name}' in row {row_index}")]
    MissingRequiredField { name: String, row_index: usize },
    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),
    #[error("upstream fatal error: {0}")]
    UpstreamFatal(String),
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    /// The batch was cancelled while this record waited for a token or a retry.
    #[error("cancelled before rendering")]
    Cancelled,
}

impl RenderError {
    /// Only transient upstream failures and timeouts are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RenderError::UpstreamTransient(_) | RenderError::Timeout(_)
        )
    }

    /// A template the renderer cannot use fails every record the same way.
    pub fn is_engine_fatal(&self) -> bool {
        matches!(self, RenderError::Template(_))
    }
}

/// Operations on an existing batch.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("batch '{0}' not found")]
    NotFound(String),
    #[error("batch '{0}' is still processing")]
    Busy(String),
    #[error("archive for batch '{0}' is not available")]
    NotReady(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NotFound",
            EngineError::Busy(_) => "Busy",
            EngineError::NotReady(_) => "NotReady",
            EngineError::Io(_) => "Io",
            EngineError::Ledger(_) => "Ledger",
        }
    }
}
