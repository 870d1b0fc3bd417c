pub mod config;
pub mod error;
pub mod log_sanitize;
pub mod model;
pub mod pipeline;
pub mod platform;
pub mod reconcile;
pub mod snapshot;
pub mod transfer;
pub mod workspace;

pub use error::{Error, Result};
