//! Wire types shared by the document batch service and its clients.
//!
//! Everything here is plain serde data: records parsed from a data source,
//! the output options a caller submits, batch snapshots returned by the
//! status surface, and the events handed to notification sinks.

pub mod events;
pub mod jobs;
pub mod model;
pub mod requests;
