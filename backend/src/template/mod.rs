//! Template model: what a template looks like and how a record fills it.
//!
//! Textual templates carry a substitution plan, the list of placeholder sites
//! in byte order, and render locally by splicing cell values into the body.
//! Binary templates (PDF, DOCX) only expose their placeholder inventory; the
//! upstream renderer performs their substitution.

pub mod envelope;
mod scan;

use crate::error::RenderError;
use common::model::record::Record;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::sync::Arc;
use thiserror::Error;

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const DOCX_BODY: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unsupported template format: {0}")]
    UnsupportedFormat(String),
    #[error("template is empty")]
    Empty,
}

impl TemplateError {
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateError::UnsupportedFormat(_) | TemplateError::Empty => "UnsupportedFormat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Pdf,
    Docx,
}

impl MediaType {
    /// Decide the media type from the upload's magic bytes, falling back to
    /// the declared content type and file name for text.
    pub fn detect(
        bytes: &[u8],
        content_type: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<MediaType, TemplateError> {
        if bytes.starts_with(PDF_MAGIC) {
            return Ok(MediaType::Pdf);
        }
        if bytes.starts_with(ZIP_MAGIC) {
            return Ok(MediaType::Docx);
        }
        let declared_binary = content_type.is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("image/") || ct.starts_with("audio/") || ct.starts_with("video/")
        });
        if declared_binary {
            return Err(TemplateError::UnsupportedFormat(format!(
                "{} ({})",
                file_name.unwrap_or("template"),
                content_type.unwrap_or_default()
            )));
        }
        Ok(MediaType::Text)
    }

    pub fn is_binary(self) -> bool {
        !matches!(self, MediaType::Text)
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Text => "txt",
            MediaType::Pdf => "pdf",
            MediaType::Docx => "docx",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DelimiterKind {
    /// `[name]`
    Bracket,
    /// `{{name}}`
    DoubleBrace,
    /// `$name$`
    Dollar,
    /// `%name%`
    Percent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionSite {
    pub offset: usize,
    pub len: usize,
    pub delimiter: DelimiterKind,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateOptions {
    pub name: String,
    /// Placeholders that may be absent from the data source.
    pub optional: Vec<String>,
}

/// Serializable view returned by the inspect endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInventory {
    pub name: String,
    pub media_type: MediaType,
    pub placeholders: Vec<String>,
    pub required: Vec<String>,
    pub sites: Vec<SubstitutionSite>,
}

#[derive(Debug, Clone)]
pub struct TemplateModel {
    name: String,
    media_type: MediaType,
    body: Arc<[u8]>,
    placeholders: Vec<String>,
    required: BTreeSet<String>,
    plan: Vec<SubstitutionSite>,
}

impl TemplateModel {
    pub fn parse(
        bytes: Vec<u8>,
        media_type: MediaType,
        options: TemplateOptions,
    ) -> Result<Self, TemplateError> {
        if bytes.is_empty() {
            return Err(TemplateError::Empty);
        }

        let (plan, sites) = match media_type {
            MediaType::Text => {
                if std::str::from_utf8(&bytes).is_err() {
                    return Err(TemplateError::UnsupportedFormat(
                        "text template is not valid UTF-8".to_string(),
                    ));
                }
                let sites = scan::sites(&bytes);
                (sites.clone(), sites)
            }
            MediaType::Docx => (Vec::new(), scan::sites(docx_text(&bytes)?.as_bytes())),
            MediaType::Pdf => {
                if !bytes.starts_with(PDF_MAGIC) {
                    return Err(TemplateError::UnsupportedFormat(
                        "PDF template lacks the %PDF- header".to_string(),
                    ));
                }
                (Vec::new(), scan::sites(&bytes))
            }
        };

        let mut placeholders: Vec<String> = Vec::new();
        for site in &sites {
            if !placeholders.contains(&site.name) {
                placeholders.push(site.name.clone());
            }
        }
        let required = placeholders
            .iter()
            .filter(|name| !options.optional.iter().any(|o| o == *name))
            .cloned()
            .collect();

        Ok(Self {
            name: options.name,
            media_type,
            body: Arc::from(bytes),
            placeholders,
            required,
            plan,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    pub fn plan(&self) -> &[SubstitutionSite] {
        &self.plan
    }

    /// Required placeholders that no header provides, sorted.
    pub fn missing_from(&self, headers: &[String]) -> Vec<String> {
        self.required
            .iter()
            .filter(|name| !headers.iter().any(|h| h == *name))
            .cloned()
            .collect()
    }

    /// First required placeholder that is absent or null in `record`.
    pub fn check_required(&self, record: &Record) -> Result<(), RenderError> {
        for name in &self.placeholders {
            if !self.required.contains(name) {
                continue;
            }
            if record.get(name).is_none_or(|v| v.is_null()) {
                return Err(RenderError::MissingRequiredField {
                    name: name.clone(),
                    row_index: record.row_index,
                });
            }
        }
        Ok(())
    }

    /// Substitute `record` into a textual template.
    pub fn render(&self, record: &Record) -> Result<Vec<u8>, RenderError> {
        if self.media_type.is_binary() {
            return Err(RenderError::Template(format!(
                "{} templates are only rendered upstream",
                self.media_type.extension()
            )));
        }
        self.check_required(record)?;

        let mut out = Vec::with_capacity(self.body.len());
        let mut cursor = 0;
        for site in &self.plan {
            out.extend_from_slice(&self.body[cursor..site.offset]);
            if let Some(value) = record.get(&site.name) {
                out.extend_from_slice(value.to_string().as_bytes());
            }
            cursor = site.offset + site.len;
        }
        out.extend_from_slice(&self.body[cursor..]);
        Ok(out)
    }

    pub fn inventory(&self) -> TemplateInventory {
        TemplateInventory {
            name: self.name.clone(),
            media_type: self.media_type,
            placeholders: self.placeholders.clone(),
            required: self.required.iter().cloned().collect(),
            sites: self.plan.clone(),
        }
    }
}

/// Visible text of a DOCX body with the markup removed, so placeholders split
/// across runs join back together.
fn docx_text(bytes: &[u8]) -> Result<String, TemplateError> {
    let unreadable = |e: &dyn std::fmt::Display| {
        TemplateError::UnsupportedFormat(format!("unreadable DOCX container: {}", e))
    };
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| unreadable(&e))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|e| unreadable(&e))?
        .read_to_string(&mut xml)
        .map_err(|e| unreadable(&e))?;

    let mut text = String::with_capacity(xml.len() / 2);
    let mut in_tag = false;
    for c in xml.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    Ok(text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&"))
}
