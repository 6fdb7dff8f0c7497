use serde::{Deserialize, Serialize};

/// Output document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pdf,
    Docx,
    Txt,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
            OutputFormat::Txt => "txt",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            OutputFormat::Txt => "text/plain; charset=utf-8",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

/// Rendering configuration submitted with a batch.
///
/// Unknown fields are rejected. The three pipeline knobs (`batchSize`,
/// `retryAttempts`, `retryBaseDelay`) are optional; the engine fills them
/// from its own defaults and validates the ranges at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub quality: Quality,
    pub include_metadata: bool,
    /// Watermark text; `None` means no watermark.
    pub watermark: Option<String>,
    pub password: Option<String>,
    /// Worker pool width for the batch.
    pub batch_size: Option<usize>,
    pub retry_attempts: Option<u32>,
    /// Base retry delay in milliseconds.
    #[serde(rename = "retryBaseDelay")]
    pub retry_base_delay_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_for_missing_fields() {
        let opts: OutputOptions = serde_json::from_str(r#"{"format":"txt"}"#).unwrap();
        assert_eq!(opts.format, OutputFormat::Txt);
        assert_eq!(opts.quality, Quality::Medium);
        assert!(!opts.include_metadata);
        assert!(opts.batch_size.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<OutputOptions>(r#"{"format":"pdf","colour":"red"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn camel_case_pipeline_fields() {
        let opts: OutputOptions = serde_json::from_str(
            r#"{"batchSize":4,"retryAttempts":3,"retryBaseDelay":250,"includeMetadata":true}"#,
        )
        .unwrap();
        assert_eq!(opts.batch_size, Some(4));
        assert_eq!(opts.retry_attempts, Some(3));
        assert_eq!(opts.retry_base_delay_ms, Some(250));
        assert!(opts.include_metadata);
    }
}
