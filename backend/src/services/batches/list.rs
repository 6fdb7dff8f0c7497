use crate::job_controller::BatchEngine;
use actix_web::{web, HttpResponse, Responder};
use common::requests::BatchListQuery;

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;

/// The Actix web handler for `GET /api/batches`.
///
/// Pages default to 50 summaries and are capped at 500.
pub(crate) async fn process(
    engine: web::Data<BatchEngine>,
    query: web::Query<BatchListQuery>,
) -> impl Responder {
    let query = query.into_inner();
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    let page = engine
        .list(query.status, query.offset.unwrap_or(0), limit)
        .await;
    HttpResponse::Ok().json(page)
}
