//! Client of the external rendering service.
//!
//! Binary templates, DOCX output and password-protected output are rendered
//! there. The service receives the raw template (base64), the record values
//! and the output options, and answers with the document bytes. Every call
//! carries the record's idempotency key so retried attempts can be
//! deduplicated upstream.

use super::{RenderRequest, Renderer};
use crate::error::RenderError;
use crate::template::{MediaType, TemplateModel};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::model::options::OutputOptions;
use common::model::record::CellValue;
use log::debug;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamPayload<'a> {
    batch_id: &'a str,
    row_index: usize,
    template_name: &'a str,
    media_type: MediaType,
    template: String,
    record: &'a BTreeMap<String, CellValue>,
    options: &'a OutputOptions,
}

#[derive(Debug, Clone)]
pub struct UpstreamRenderer {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl UpstreamRenderer {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
            timeout,
        })
    }

    /// One attempt's HTTP request; `Accept` names the requested document type.
    fn request(&self, request: &RenderRequest) -> reqwest::RequestBuilder {
        let payload = UpstreamPayload {
            batch_id: &request.batch_id,
            row_index: request.row_index(),
            template_name: request.template.name(),
            media_type: request.template.media_type(),
            template: BASE64.encode(request.template.body()),
            record: &request.record.values,
            options: &request.options,
        };
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .header(ACCEPT, request.options.format.mime_type())
            .json(&payload);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

#[async_trait]
impl Renderer for UpstreamRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        request.template.check_required(&request.record)?;

        let response = self
            .request(request)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout))?;
        let status = response.status();
        debug!(
            "Upstream answered {} for batch {} row {}",
            status,
            request.batch_id,
            request.row_index()
        );
        if status.is_success() {
            return response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| classify_transport(e, self.timeout));
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    fn supports(&self, _template: &TemplateModel, _options: &OutputOptions) -> Result<(), String> {
        Ok(())
    }
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> RenderError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.chars().take(200).collect::<String>())
    };
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        RenderError::UpstreamTransient(detail)
    } else {
        RenderError::UpstreamFatal(detail)
    }
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> RenderError {
    if err.is_timeout() {
        RenderError::Timeout(timeout)
    } else {
        RenderError::UpstreamTransient(err.to_string())
    }
}
