use crate::error::SubmitError;
use crate::job_controller::{BatchEngine, Submission};
use crate::services::submit_error;
use crate::services::upload::{self, UploadParts};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder};
use common::model::options::OutputOptions;
use common::requests::{NotificationTarget, SourceSettings, SubmitResponse, TemplateSettings};
use log::warn;
use std::path::Path;
use uuid::Uuid;

const FILE_PARTS: [&str; 2] = ["template", "records"];
const JSON_PARTS: [&str; 4] = ["options", "notify", "templateOptions", "sourceOptions"];

/// The Actix web handler for `POST /api/batches`.
///
/// Streams the multipart upload to disk, parses the template and the data
/// source, and hands both to the engine. The batch is accepted before any
/// document is rendered; the client follows it by id.
///
/// # Arguments
/// * `engine` - The shared `BatchEngine`, injected by Actix.
/// * `payload` - The multipart body with the `template` and `records` files
///   and the optional JSON parts.
///
/// # Returns
/// `202 Accepted` with the pending snapshot and the estimated completion
/// time, or an error body (`400` for rejected input, `500` otherwise).
pub(crate) async fn process(engine: web::Data<BatchEngine>, payload: Multipart) -> impl Responder {
    match submit_batch(&engine, payload).await {
        Ok(response) => HttpResponse::Accepted().json(response),
        Err(err) => submit_error(&err),
    }
}

/// Stage the upload under the batch's own directory and hand it to the
/// engine. The directory is removed again when the submission is refused.
async fn submit_batch(
    engine: &BatchEngine,
    payload: Multipart,
) -> Result<SubmitResponse, SubmitError> {
    let batch_id = Uuid::new_v4().to_string();
    let dir = engine.working_dir(&batch_id);
    tokio::fs::create_dir_all(&dir).await?;

    let result = stage_and_submit(engine, payload, batch_id, &dir).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            warn!("Could not remove staging dir {}: {}", dir.display(), e);
        }
    }
    result
}

async fn stage_and_submit(
    engine: &BatchEngine,
    payload: Multipart,
    batch_id: String,
    dir: &Path,
) -> Result<SubmitResponse, SubmitError> {
    let limit = engine.config().max_source_bytes;
    let mut parts: UploadParts =
        upload::receive(payload, dir, &FILE_PARTS, &JSON_PARTS, limit).await?;

    let options: OutputOptions = parts.json("options")?.unwrap_or_default();
    let notify: Option<NotificationTarget> = parts.json("notify")?;
    let template_settings: TemplateSettings = parts.json("templateOptions")?.unwrap_or_default();
    let source_settings: SourceSettings = parts.json("sourceOptions")?.unwrap_or_default();

    let template_file = parts.take_file("template")?;
    let records_file = parts.take_file("records")?;

    let template = upload::parse_template(&template_file, template_settings).await?;
    let source_options = upload::source_options(engine.source_options(), &source_settings)?;
    let source = upload::parse_source(&records_file, source_options).await?;
    template_file.discard().await;
    records_file.discard().await;

    engine
        .submit(Submission {
            batch_id: Some(batch_id),
            template,
            source,
            options,
            notify,
        })
        .await
}
