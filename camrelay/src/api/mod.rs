//! REST API server module.
//!
//! Provides HTTP endpoints for starting and stopping streams, serving their
//! HLS artifacts, and operating the service.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
