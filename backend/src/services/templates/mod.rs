//! Template endpoints.
//!
//! `POST /api/templates/inspect` takes a multipart `template` part (plus an
//! optional `templateOptions` JSON part) and answers with the placeholder
//! inventory the engine would use, without creating a batch. Callers use it
//! to check a template against their data source headers up front.

mod inspect;

use actix_web::web::{post, scope};
use actix_web::Scope;

const API_PATH: &str = "/api/templates";

pub fn configure_routes() -> Scope {
    scope(API_PATH).route("/inspect", post().to(inspect::process))
}
