// gamedetect/core/api/src/lib.rs

// HTTP boundary for the coordination service
pub mod metrics;
pub mod redirect;
pub mod server;
pub mod types;

pub use server::{ApiConfig, ApiServer};
