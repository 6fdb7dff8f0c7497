//! HTTP surface: one actix scope per resource plus the error bodies they share.

pub mod batches;
pub mod data_sources;
pub mod templates;
pub mod upload;

use crate::error::{EngineError, SubmitError};
use actix_web::{web, HttpResponse};
use log::{error, warn};
use serde::Serialize;

/// JSON body limit for non-multipart requests.
pub const JSON_LIMIT: usize = 10 * 1024 * 1024;

/// Register every scope on an app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(batches::configure_routes())
        .service(templates::configure_routes())
        .service(data_sources::csv::configure_routes());
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl ErrorBody {
    fn new(error: &'static str, message: String) -> Self {
        Self {
            error,
            message,
            missing: Vec::new(),
        }
    }
}

pub(crate) fn submit_error(err: &SubmitError) -> HttpResponse {
    let mut body = ErrorBody::new(err.kind(), err.to_string());
    if let SubmitError::SchemaMismatch { missing } = err {
        body.missing = missing.clone();
    }
    if err.is_validation() {
        warn!("Rejected request: {}", err);
        HttpResponse::BadRequest().json(body)
    } else {
        error!("Request failed: {}", err);
        HttpResponse::InternalServerError().json(body)
    }
}

pub(crate) fn engine_error(err: &EngineError) -> HttpResponse {
    let body = ErrorBody::new(err.kind(), err.to_string());
    match err {
        EngineError::NotFound(_) => HttpResponse::NotFound().json(body),
        EngineError::Busy(_) | EngineError::NotReady(_) => HttpResponse::Conflict().json(body),
        EngineError::Io(_) | EngineError::Ledger(_) => {
            error!("Request failed: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}
