//! Configuration types for dustwatch

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::detection::DetectionParams;
use crate::error::{DustwatchError, DustwatchResult};
use crate::model::{DeploymentMode, ModelRegistry, DEFAULT_MODEL_NAME};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Model location and policy configuration
    pub models: ModelsConfig,
    /// Detector worker configuration
    pub worker: WorkerConfig,
    /// Inference parameters
    pub detection: DetectionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> DustwatchResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DustwatchError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| DustwatchError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment overrides.
    ///
    /// `lookup` is `std::env::var(..).ok()` in the daemon; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> DustwatchResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.api.port = port
                .trim()
                .parse()
                .map_err(|_| DustwatchError::Config(format!("Invalid PORT: {}", port)))?;
        }
        if let Some(address) = lookup("DUSTWATCH_ADDRESS") {
            self.api.address = address;
        }
        if let Some(dir) = lookup("DUSTWATCH_MODEL_DIR") {
            self.models.local_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DUSTWATCH_CACHE_DIR") {
            self.models.cache_dir = PathBuf::from(dir);
        }
        if let Some(registry) = lookup("DUSTWATCH_REGISTRY") {
            self.models.registry = ModelRegistry::parse_env(&registry)?;
        }
        if let Some(name) = lookup("DUSTWATCH_DEFAULT_MODEL") {
            self.models.default_model = name;
        }
        if let Some(mode) = lookup("DUSTWATCH_MODE") {
            self.models.mode = mode.parse()?;
        }
        if let Some(name) = lookup("DUSTWATCH_RESTRICTED_MODEL") {
            self.models.restricted_model = name;
        }
        if let Some(command) = lookup("DUSTWATCH_DETECTOR_COMMAND") {
            self.worker.command = PathBuf::from(command);
        }
        if let Some(level) = lookup("DUSTWATCH_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Check cross-field invariants that serde cannot express
    pub fn validate(&self) -> DustwatchResult<()> {
        let registry = &self.models.registry;
        if !registry.contains(&self.models.default_model) {
            return Err(DustwatchError::Config(format!(
                "Default model {} is not in the registry",
                self.models.default_model
            )));
        }
        if !registry.contains(&self.models.restricted_model) {
            return Err(DustwatchError::Config(format!(
                "Restricted model {} is not in the registry",
                self.models.restricted_model
            )));
        }
        if self.models.fetch_attempts == 0 {
            return Err(DustwatchError::Config(
                "fetch_attempts must be at least 1".to_string(),
            ));
        }
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.confidence) || !(0.0..=1.0).contains(&d.iou) {
            return Err(DustwatchError::Config(
                "Detection thresholds must be within 0..1".to_string(),
            ));
        }
        Ok(())
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8000,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Where model weights live and which model requests are allowed to use
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Operator-provided weights, checked first
    pub local_dir: PathBuf,
    /// Downloaded weights, checked second
    pub cache_dir: PathBuf,
    /// Name to URL registry
    pub registry: ModelRegistry,
    /// Fallback for unregistered names in open mode
    pub default_model: String,
    /// Open or restricted serving
    pub mode: DeploymentMode,
    /// The only model served in restricted mode
    pub restricted_model: String,
    /// Cache files smaller than this are treated as partial downloads
    pub min_cache_file_size: u64,
    /// Download attempts per fetch
    pub fetch_attempts: u32,
    /// Delay between download attempts
    pub fetch_retry_delay_secs: u64,
    /// Timeout for a single download attempt
    pub fetch_timeout_secs: u64,
    /// Load the default (or restricted) model at startup
    pub preload: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from("./Model"),
            cache_dir: PathBuf::from("./cache/models"),
            registry: ModelRegistry::default(),
            default_model: DEFAULT_MODEL_NAME.to_string(),
            mode: DeploymentMode::Open,
            restricted_model: DEFAULT_MODEL_NAME.to_string(),
            min_cache_file_size: 1024 * 1024,
            fetch_attempts: 3,
            fetch_retry_delay_secs: 5,
            fetch_timeout_secs: 300,
            preload: false,
        }
    }
}

/// Detector worker process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Detector executable
    pub command: PathBuf,
    /// Additional arguments for the detector
    pub extra_args: Vec<String>,
    /// Loopback address the worker binds
    pub host: String,
    /// Port the worker binds
    pub port: u16,
    /// How long to wait for the worker to report healthy
    pub startup_timeout_secs: u64,
    /// Timeout for a single prediction request
    pub request_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("dustwatch-detector"),
            extra_args: Vec::new(),
            host: "127.0.0.1".to_string(),
            port: 30100,
            startup_timeout_secs: 120,
            request_timeout_secs: 300,
        }
    }
}

/// Inference parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Confidence threshold
    pub confidence: f32,
    /// IoU threshold
    pub iou: f32,
    /// Inference resolution for the timing endpoint
    pub timing_image_size: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence: 0.2,
            iou: 0.45,
            timing_image_size: 960,
        }
    }
}

impl DetectionConfig {
    /// Parameters for `/api/detect`
    pub fn detect_params(&self) -> DetectionParams {
        DetectionParams {
            confidence: self.confidence,
            iou: self.iou,
            image_size: None,
        }
    }

    /// Parameters for `/api/inference-time`
    pub fn timing_params(&self) -> DetectionParams {
        DetectionParams {
            image_size: Some(self.timing_image_size),
            ..self.detect_params()
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}
