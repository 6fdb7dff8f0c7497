use crate::error::SubmitError;
use crate::job_controller::BatchEngine;
use crate::services::submit_error;
use crate::services::upload;
use crate::template::TemplateInventory;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder};
use common::requests::TemplateSettings;

/// The Actix web handler for `POST /api/templates/inspect`.
///
/// Parses an uploaded `template` part without creating a batch and reports
/// its media type, placeholders and required set, so a client can check a
/// template against its data before submitting.
///
/// # Arguments
/// * `engine` - The shared `BatchEngine`, used for the working root.
/// * `payload` - The multipart body with `template` and an optional
///   `templateOptions` JSON part.
///
/// # Returns
/// `200` with the inventory, or `400` when the template cannot be parsed.
pub(crate) async fn process(engine: web::Data<BatchEngine>, payload: Multipart) -> impl Responder {
    match inspect_template(&engine, payload).await {
        Ok(inventory) => HttpResponse::Ok().json(inventory),
        Err(err) => submit_error(&err),
    }
}

async fn inspect_template(
    engine: &BatchEngine,
    payload: Multipart,
) -> Result<TemplateInventory, SubmitError> {
    let root = &engine.config().working_root;
    tokio::fs::create_dir_all(root).await?;
    let staging = tempfile::Builder::new()
        .prefix(".inspect-")
        .tempdir_in(root)?;

    let mut parts = upload::receive(
        payload,
        staging.path(),
        &["template"],
        &["templateOptions"],
        engine.config().max_source_bytes,
    )
    .await?;
    let settings: TemplateSettings = parts.json("templateOptions")?.unwrap_or_default();
    let file = parts.take_file("template")?;
    let template = upload::parse_template(&file, settings).await?;
    Ok(template.inventory())
}
