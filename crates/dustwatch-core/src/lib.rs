//! dustwatch-core: Core types for the dustwatch detection service
//!
//! This crate provides the fundamental types used throughout dustwatch:
//! - Model registry, model sources and deployment mode
//! - Detection results and parameters
//! - Configuration types
//! - Error handling

pub mod config;
pub mod detection;
pub mod error;
pub mod model;

pub use config::*;
pub use detection::*;
pub use error::*;
pub use model::*;
