use crate::job_controller::BatchEngine;
use crate::services::engine_error;
use actix_web::{web, HttpResponse, Responder};

/// The Actix web handler for `POST /api/batches/{batch_id}/cancel`.
///
/// A pending batch is cancelled at once. A processing batch stops dispatching
/// and the response shows the request time; the terminal transition follows
/// once in-flight rows finish. A terminal batch is returned unchanged.
///
/// # Arguments
/// * `engine` - The shared `BatchEngine`.
/// * `batch_id` - The batch to cancel.
///
/// # Returns
/// `200` with the current snapshot, or `404` for an unknown id.
pub(crate) async fn process(
    engine: web::Data<BatchEngine>,
    batch_id: web::Path<String>,
) -> impl Responder {
    match engine.cancel(&batch_id).await {
        Ok(snapshot) => HttpResponse::Ok().json(snapshot),
        Err(err) => engine_error(&err),
    }
}
