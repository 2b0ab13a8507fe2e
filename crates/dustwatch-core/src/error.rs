//! Error types for dustwatch

use thiserror::Error;

/// Main error type for dustwatch
#[derive(Error, Debug)]
pub enum DustwatchError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No local, cached or registered source exists for the model
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// A source was located but no usable instance could be built from it
    #[error("Failed to load model {model}: {reason}")]
    LoadFailed { model: String, reason: String },

    /// Remote weights could not be fetched; a later attempt may succeed
    #[error("Failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// Uploaded image is missing or cannot be decoded
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Detection ran against a loaded model and failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DustwatchError {
    /// True when the requested model cannot be served right now.
    ///
    /// Callers report this separately from a detection that ran and found
    /// nothing.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DustwatchError::ModelNotFound(_)
                | DustwatchError::LoadFailed { .. }
                | DustwatchError::FetchFailed { .. }
        )
    }

    /// True when retrying later may succeed without a configuration change.
    pub fn is_transient(&self) -> bool {
        matches!(self, DustwatchError::FetchFailed { .. })
    }
}

/// Result type for dustwatch operations
pub type DustwatchResult<T> = Result<T, DustwatchError>;

impl From<serde_json::Error> for DustwatchError {
    fn from(err: serde_json::Error) -> Self {
        DustwatchError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DustwatchError {
    fn from(err: toml::de::Error) -> Self {
        DustwatchError::Config(err.to_string())
    }
}
