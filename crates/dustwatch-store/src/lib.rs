//! dustwatch-store: Model storage
//!
//! This crate decides where model weights come from:
//! - Source resolution (local directory, cache directory, registry URL)
//! - Deployment policy (which model a request is allowed to use)
//! - Fetching remote weights into the cache directory

pub mod fetch;
pub mod policy;
pub mod resolver;

pub use fetch::{HttpFetcher, WeightsFetcher};
pub use policy::{EffectiveModel, ModelPolicy};
pub use resolver::{ModelResolver, SourceResolver};
