//! Envelope lines added around a rendered body.
//!
//! Both envelopes are single lines holding base64 data so they survive any
//! text content: `[meta:<base64 JSON>]` first, `[wm:<base64 text>]` last.
//! The PDF layout recognises them; text output keeps them verbatim.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const META_PREFIX: &str = "[meta:";
const WATERMARK_PREFIX: &str = "[wm:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub generated_at: DateTime<Utc>,
    pub template_name: String,
    pub row_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeLine {
    Metadata(Metadata),
    Watermark(String),
}

pub fn metadata_line(meta: &Metadata) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(meta)?;
    Ok(format!("{}{}]", META_PREFIX, BASE64.encode(json)))
}

pub fn watermark_line(text: &str) -> String {
    format!("{}{}]", WATERMARK_PREFIX, BASE64.encode(text.as_bytes()))
}

/// Prepend the metadata line and append the watermark line as requested.
pub fn wrap(
    body: Vec<u8>,
    meta: Option<&Metadata>,
    watermark: Option<&str>,
) -> Result<Vec<u8>, serde_json::Error> {
    if meta.is_none() && watermark.is_none() {
        return Ok(body);
    }
    let mut out = Vec::with_capacity(body.len() + 128);
    if let Some(meta) = meta {
        out.extend_from_slice(metadata_line(meta)?.as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(&body);
    if let Some(text) = watermark {
        if !out.is_empty() && !out.ends_with(b"\n") {
            out.push(b'\n');
        }
        out.extend_from_slice(watermark_line(text).as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

/// Decode an envelope line; `None` for ordinary content.
pub fn parse_line(line: &str) -> Option<EnvelopeLine> {
    let line = line.trim_end();
    if let Some(inner) = line.strip_prefix(META_PREFIX).and_then(|s| s.strip_suffix(']')) {
        let json = BASE64.decode(inner).ok()?;
        return serde_json::from_slice(&json).ok().map(EnvelopeLine::Metadata);
    }
    if let Some(inner) = line
        .strip_prefix(WATERMARK_PREFIX)
        .and_then(|s| s.strip_suffix(']'))
    {
        let text = BASE64.decode(inner).ok()?;
        return String::from_utf8(text).ok().map(EnvelopeLine::Watermark);
    }
    None
}
