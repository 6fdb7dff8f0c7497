//! Renderers turn one record plus the batch template into document bytes.
//!
//! The engine only ever talks to [`resilient::ResilientRenderer`], which
//! wraps the [`routing::RoutingRenderer`] choosing between the local text and
//! PDF renderers and the upstream rendering service.

pub mod pdf;
pub mod resilient;
pub mod routing;
pub mod text;
pub mod upstream;

use crate::error::RenderError;
use crate::template::envelope::{self, Metadata};
use crate::template::TemplateModel;
use async_trait::async_trait;
use chrono::Utc;
use common::model::options::OutputOptions;
use common::model::record::Record;
use std::sync::Arc;

/// Everything a renderer needs for one document.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub batch_id: String,
    pub template: Arc<TemplateModel>,
    pub options: Arc<OutputOptions>,
    pub record: Record,
    /// Same value on every attempt for this record.
    pub idempotency_key: String,
}

impl RenderRequest {
    pub fn new(
        batch_id: &str,
        template: Arc<TemplateModel>,
        options: Arc<OutputOptions>,
        record: Record,
    ) -> Self {
        let idempotency_key = idempotency_key(batch_id, record.row_index);
        Self {
            batch_id: batch_id.to_string(),
            template,
            options,
            record,
            idempotency_key,
        }
    }

    pub fn row_index(&self) -> usize {
        self.record.row_index
    }
}

pub fn idempotency_key(batch_id: &str, row_index: usize) -> String {
    format!("{:x}", md5::compute(format!("{}:{}", batch_id, row_index)))
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError>;

    /// Checked once at submission; `Err` carries the reason the combination
    /// of template and options cannot be rendered.
    fn supports(&self, template: &TemplateModel, options: &OutputOptions) -> Result<(), String>;
}

/// Substituted body with the metadata and watermark envelopes applied.
pub(crate) fn enveloped_body(request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
    let body = request.template.render(&request.record)?;
    let meta = request.options.include_metadata.then(|| Metadata {
        generated_at: Utc::now(),
        template_name: request.template.name().to_string(),
        row_index: request.record.row_index,
    });
    envelope::wrap(body, meta.as_ref(), request.options.watermark.as_deref())
        .map_err(|e| RenderError::Record(format!("metadata envelope: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_stable_per_record() {
        assert_eq!(idempotency_key("b1", 4), idempotency_key("b1", 4));
        assert_ne!(idempotency_key("b1", 4), idempotency_key("b1", 5));
        assert_ne!(idempotency_key("b1", 4), idempotency_key("b2", 4));
        assert_eq!(idempotency_key("b1", 4).len(), 32);
    }
}
