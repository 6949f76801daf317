pub mod api;
pub mod listener;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod utils;
