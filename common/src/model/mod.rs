pub mod batch;
pub mod csv;
pub mod options;
pub mod place_holder;
pub mod record;
