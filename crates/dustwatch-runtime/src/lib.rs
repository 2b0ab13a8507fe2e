//! dustwatch-runtime: Detector runtime
//!
//! This crate runs the detection model:
//! - Detector traits the request layer talks to
//! - Process-backed detector worker and its health probe
//! - The active model cache holding at most one loaded detector

pub mod cache;
pub mod health;
pub mod process;
pub mod traits;

pub use cache::{ActiveModelCache, CacheState, CacheStatus};
pub use health::{HealthChecker, Probe};
pub use process::{ProcessDetector, ProcessDetectorLoader, ProcessWorkerConfig};
pub use traits::{Detector, DetectorLoader};
