//! camrelay library crate.
//!
//! Resolves camera descriptors, supervises one transcoder process per stream
//! and serves the resulting HLS artifacts.

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod registry;
pub mod source;
pub mod store;
pub mod supervisor;
pub mod transcoder;

pub use error::{Error, Result};
