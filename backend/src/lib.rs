//! Bulk document generation: one template, one data source, one document per
//! record, bundled into a single archive.

pub mod config;
pub mod error;
pub mod job_controller;
pub mod notify;
pub mod render;
pub mod services;
pub mod source;
pub mod template;
