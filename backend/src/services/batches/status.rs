use crate::job_controller::BatchEngine;
use crate::services::engine_error;
use actix_web::{web, HttpResponse, Responder};
use common::requests::ResultsWindow;

/// The Actix web handler for `GET /api/batches/{batch_id}`.
///
/// `offset` and `limit` select a window of the per-row results; without
/// either the full list is returned.
///
/// # Arguments
/// * `engine` - The shared `BatchEngine`.
/// * `batch_id` - The id returned at submission.
/// * `query` - The optional results window.
///
/// # Returns
/// `200` with the snapshot, or `404` for an unknown id.
pub(crate) async fn process(
    engine: web::Data<BatchEngine>,
    batch_id: web::Path<String>,
    query: web::Query<ResultsWindow>,
) -> impl Responder {
    let window = match (query.offset, query.limit) {
        (None, None) => None,
        (offset, limit) => Some((offset.unwrap_or(0), limit.unwrap_or(usize::MAX))),
    };
    match engine.status(&batch_id, window).await {
        Ok(snapshot) => HttpResponse::Ok().json(snapshot),
        Err(err) => engine_error(&err),
    }
}
