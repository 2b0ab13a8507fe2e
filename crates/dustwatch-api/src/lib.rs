//! dustwatch-api: REST API server for dustwatch
//!
//! This crate provides the HTTP surface of the detection service:
//! - Dust-storm detection and inference timing
//! - Model listing, status and eviction
//! - Image decoding, box overlay and PNG/base64 packaging

pub mod error;
pub mod imaging;
pub mod rest;

pub use error::ApiError;
pub use rest::{create_router, AppState};
