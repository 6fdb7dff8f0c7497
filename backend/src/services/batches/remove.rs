use crate::error::EngineError;
use crate::job_controller::BatchEngine;
use crate::services::engine_error;
use actix_web::{web, HttpResponse, Responder};

/// The Actix web handler for `DELETE /api/batches/{batch_id}`.
///
/// Removes the batch, its working directory and its ledger row. A pending
/// batch is cancelled first; a processing one is refused with `409`.
///
/// # Returns
/// `true` when something was removed, `false` for an unknown id.
pub(crate) async fn process(
    engine: web::Data<BatchEngine>,
    batch_id: web::Path<String>,
) -> impl Responder {
    match engine.delete(&batch_id).await {
        Ok(()) => HttpResponse::Ok().json(true),
        Err(EngineError::NotFound(_)) => HttpResponse::Ok().json(false),
        Err(err) => engine_error(&err),
    }
}
