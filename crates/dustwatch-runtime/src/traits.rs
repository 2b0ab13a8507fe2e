//! Detector trait definitions

use async_trait::async_trait;
use dustwatch_core::{Detection, DetectionParams, DustwatchResult};
use std::path::Path;
use std::sync::Arc;

/// A loaded detection model
#[async_trait]
pub trait Detector: Send + Sync {
    /// Name of the model this instance was loaded for
    fn model_name(&self) -> &str;

    /// Run detection on a PNG-encoded image
    async fn detect(&self, png: &[u8], params: &DetectionParams) -> DustwatchResult<Vec<Detection>>;

    /// Whether the instance can still serve requests
    fn is_alive(&self) -> bool {
        true
    }

    /// Free the resources held by this instance. Later `detect` calls fail.
    async fn release(&self) {}
}

/// Builds detector instances from weights on disk
#[async_trait]
pub trait DetectorLoader: Send + Sync {
    /// Load the weights at `weights` as model `name`
    async fn load(&self, name: &str, weights: &Path) -> DustwatchResult<Arc<dyn Detector>>;

    /// Get the loader name
    fn name(&self) -> &'static str;
}
