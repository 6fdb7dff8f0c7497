//! Data source verification.
//!
//! `POST /api/data_sources/csv/verify` parses an uploaded `records` part with
//! the same reader the batch engine uses (optional `sourceOptions` JSON part)
//! and reports the detected encoding and delimiter, the headers, the record
//! count, a type guess per column taken from the first record, and the first
//! cell that does not fit its column's type.

use actix_web::web::{post, scope};
use actix_web::Scope;

mod verify;

const API_PATH: &str = "/api/data_sources/csv";

pub fn configure_routes() -> Scope {
    scope(API_PATH).route("/verify", post().to(verify::process))
}
