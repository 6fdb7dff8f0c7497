//! Multipart intake shared by the upload endpoints.
//!
//! File parts are streamed chunk by chunk into a staging directory while
//! their md5 is computed; small JSON parts are buffered. Limits are checked
//! per chunk so an oversized upload is refused before it is fully read.

use crate::error::SubmitError;
use crate::source::{self, ParsedSource, SourceError, SourceOptions};
use crate::template::{MediaType, TemplateModel, TemplateOptions};
use actix_multipart::Multipart;
use common::requests::{SourceSettings, TemplateSettings};
use futures_util::StreamExt;
use log::warn;
use md5::Context;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

pub const JSON_PART_LIMIT: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("malformed multipart body: {0}")]
    Multipart(String),
    #[error("part '{part}' exceeds {limit} bytes")]
    TooLarge { part: String, limit: usize },
    #[error("missing '{0}' part")]
    MissingPart(&'static str),
    #[error("part '{part}' is not valid JSON: {message}")]
    Json { part: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<UploadError> for SubmitError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::TooLarge { .. } => {
                SubmitError::Source(SourceError::TooLarge(err.to_string()))
            }
            UploadError::Json { .. } => SubmitError::InvalidOptions(err.to_string()),
            UploadError::Io(e) => SubmitError::Io(e),
            other => SubmitError::Upload(other.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct StagedFile {
    pub path: PathBuf,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    pub md5: String,
}

impl StagedFile {
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// Remove the staged copy; a missing file is fine.
    pub async fn discard(self) {
        remove_staged(&self.path).await;
    }
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove staged upload {}: {}", path.display(), e),
    }
}

#[derive(Debug, Default)]
pub struct UploadParts {
    files: HashMap<String, StagedFile>,
    fields: HashMap<String, Vec<u8>>,
}

impl UploadParts {
    pub fn take_file(&mut self, name: &'static str) -> Result<StagedFile, UploadError> {
        self.files.remove(name).ok_or(UploadError::MissingPart(name))
    }

    /// Deserialize a JSON part; `None` when it was not sent.
    pub fn json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, UploadError> {
        match self.fields.get(name) {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| UploadError::Json {
                    part: name.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}

/// Extension of the uploaded file name when it is short and alphanumeric.
fn staged_extension(file_name: Option<&str>) -> &str {
    file_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin")
}

/// Read the whole multipart body. Parts named in `file_parts` are staged as
/// `<dir>/<part>.<ext>`, parts in `json_parts` are buffered, others skipped.
pub async fn receive(
    mut payload: Multipart,
    dir: &Path,
    file_parts: &[&str],
    json_parts: &[&str],
    file_limit: usize,
) -> Result<UploadParts, UploadError> {
    let mut parts = UploadParts::default();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| UploadError::Multipart(e.to_string()))?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|n| n.to_string()))
            .unwrap_or_default();

        if file_parts.contains(&name.as_str()) {
            let file_name = field
                .content_disposition()
                .and_then(|cd| cd.get_filename().map(|f| f.to_string()));
            let content_type = field.content_type().map(|m| m.to_string());
            let path = dir.join(format!("{}.{}", name, staged_extension(file_name.as_deref())));

            let mut file = tokio::fs::File::create(&path).await?;
            let mut md5_hasher = Context::new();
            let mut size = 0usize;
            while let Some(chunk) = field.next().await {
                let chunk = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
                size += chunk.len();
                if size > file_limit {
                    drop(file);
                    remove_staged(&path).await;
                    return Err(UploadError::TooLarge {
                        part: name,
                        limit: file_limit,
                    });
                }
                md5_hasher.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            parts.files.insert(
                name,
                StagedFile {
                    path,
                    file_name,
                    content_type,
                    size,
                    md5: format!("{:x}", md5_hasher.finalize()),
                },
            );
        } else if json_parts.contains(&name.as_str()) {
            let mut bytes = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
                if bytes.len() + chunk.len() > JSON_PART_LIMIT {
                    return Err(UploadError::TooLarge {
                        part: name,
                        limit: JSON_PART_LIMIT,
                    });
                }
                bytes.extend_from_slice(&chunk);
            }
            parts.fields.insert(name, bytes);
        } else {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
            }
        }
    }

    Ok(parts)
}

/// Build the template model from a staged upload.
pub async fn parse_template(
    file: &StagedFile,
    settings: TemplateSettings,
) -> Result<TemplateModel, SubmitError> {
    let bytes = file.read().await?;
    let media_type = MediaType::detect(
        &bytes,
        file.content_type.as_deref(),
        file.file_name.as_deref(),
    )?;
    let name = settings
        .name
        .or_else(|| {
            file.file_name.as_deref().map(|n| {
                Path::new(n)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| n.to_string())
            })
        })
        .unwrap_or_else(|| "template".to_string());
    Ok(TemplateModel::parse(
        bytes,
        media_type,
        TemplateOptions {
            name,
            optional: settings.optional,
        },
    )?)
}

/// Source options from the engine limits and the caller's settings.
pub fn source_options(
    mut base: SourceOptions,
    settings: &SourceSettings,
) -> Result<SourceOptions, SubmitError> {
    base.has_headers = settings.has_headers;
    base.keep_empty_rows = settings.keep_empty_rows;
    base.delimiter = match settings.delimiter.as_deref() {
        None => None,
        Some("\\t") | Some("\t") => Some(b'\t'),
        Some(d) if d.len() == 1 && d.is_ascii() => Some(d.as_bytes()[0]),
        Some(d) => {
            return Err(SubmitError::InvalidOptions(format!(
                "delimiter must be a single ASCII character, got '{}'",
                d
            )))
        }
    };
    Ok(base)
}

/// Parse a staged data source on the blocking pool.
pub async fn parse_source(
    file: &StagedFile,
    options: SourceOptions,
) -> Result<ParsedSource, SubmitError> {
    let bytes = file.read().await?;
    let parsed = tokio::task::spawn_blocking(move || source::parse(&bytes, &options))
        .await
        .map_err(|e| SubmitError::Io(std::io::Error::other(e.to_string())))??;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_extension_is_sanitised() {
        assert_eq!(staged_extension(Some("people.csv")), "csv");
        assert_eq!(staged_extension(Some("../../etc/passwd")), "bin");
        assert_eq!(staged_extension(Some("x.t$t")), "bin");
        assert_eq!(staged_extension(None), "bin");
    }

    #[tokio::test]
    async fn discard_removes_the_staged_copy_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        tokio::fs::write(&path, b"a,b\n1,2\n").await.unwrap();
        let staged = |path: &Path| StagedFile {
            path: path.to_path_buf(),
            file_name: Some("records.csv".into()),
            content_type: None,
            size: 8,
            md5: String::new(),
        };

        staged(&path).discard().await;
        assert!(!path.exists());
        // Already gone: nothing to remove, nothing to report.
        staged(&path).discard().await;

        let busy = dir.path().join("busy");
        tokio::fs::create_dir(&busy).await.unwrap();
        tokio::fs::write(busy.join("inner"), b"x").await.unwrap();
        // A directory cannot be removed as a file; the error is logged only.
        staged(&busy).discard().await;
        assert!(busy.exists());
    }

    #[test]
    fn delimiter_settings() {
        let settings = SourceSettings {
            delimiter: Some("\\t".into()),
            ..Default::default()
        };
        let opts = source_options(SourceOptions::default(), &settings).unwrap();
        assert_eq!(opts.delimiter, Some(b'\t'));

        let settings = SourceSettings {
            delimiter: Some(";;".into()),
            ..Default::default()
        };
        assert!(source_options(SourceOptions::default(), &settings).is_err());
    }
}
