pub mod common;
pub mod datasets;
pub mod errors;
