//! Batch lifecycle endpoints.
//!
//! - `POST /api/batches`: multipart submission (`template`, `records`, and the
//!   optional JSON parts `options`, `notify`, `templateOptions`,
//!   `sourceOptions`). Answers `202` with the pending snapshot.
//! - `GET /api/batches`: page of summaries, filterable by `status`.
//! - `GET /api/batches/{id}`: snapshot, `offset`/`limit` window the results.
//! - `POST /api/batches/{id}/cancel`
//! - `GET /api/batches/{id}/download`: the archive of a completed batch.
//! - `DELETE /api/batches/{id}`

use actix_web::web::{delete, get, post, scope};
use actix_web::Scope;

mod cancel;
mod download;
mod list;
mod remove;
mod status;
mod submit;

const API_PATH: &str = "/api/batches";

pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("", post().to(submit::process))
        .route("", get().to(list::process))
        .route("/{batch_id}", get().to(status::process))
        .route("/{batch_id}", delete().to(remove::process))
        .route("/{batch_id}/cancel", post().to(cancel::process))
        .route("/{batch_id}/download", get().to(download::process))
}
