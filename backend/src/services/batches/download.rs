use crate::error::EngineError;
use crate::job_controller::BatchEngine;
use crate::services::engine_error;
use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse};

/// The Actix web handler for `GET /api/batches/{batch_id}/download`.
///
/// Serves the archive as an attachment named `<batch_id>.zip`.
///
/// # Arguments
/// * `req` - The request, needed by `NamedFile` for range and cache headers.
/// * `engine` - The shared `BatchEngine`.
/// * `batch_id` - The batch whose archive is wanted.
///
/// # Returns
/// The archive, `409` when the batch has no archive (not completed, or the
/// file is gone), or `404` for an unknown id.
pub(crate) async fn process(
    req: HttpRequest,
    engine: web::Data<BatchEngine>,
    batch_id: web::Path<String>,
) -> HttpResponse {
    match open_archive(&engine, &batch_id).await {
        Ok(file) => file.into_response(&req),
        Err(err) => engine_error(&err),
    }
}

async fn open_archive(engine: &BatchEngine, batch_id: &str) -> Result<NamedFile, EngineError> {
    let path = engine.archive_path(batch_id).await?;
    let file = NamedFile::open_async(&path).await?;
    Ok(file.set_content_disposition(ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(format!("{}.zip", batch_id))],
    }))
}
