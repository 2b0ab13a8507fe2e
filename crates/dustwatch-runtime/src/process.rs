//! Process-backed detector
//!
//! Each loaded model is a detector worker process started with the weights
//! path. The worker speaks a small HTTP protocol on loopback:
//!
//! - `GET /health` answers 2xx once the weights are loaded
//! - `POST /predict?conf=<f>&iou=<f>[&imgsz=<n>]` takes a PNG body and
//!   answers `{"detections":[{"xyxy":[x1,y1,x2,y2],"confidence":c}]}`
//!
//! Releasing a detector kills its process, which is what frees the model
//! memory.

use async_trait::async_trait;
use dustwatch_core::{
    BoundingBox, Detection, DetectionParams, DustwatchError, DustwatchResult, WorkerConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::health::HealthChecker;
use crate::traits::{Detector, DetectorLoader};

/// Process-based detector configuration
#[derive(Debug, Clone)]
pub struct ProcessWorkerConfig {
    /// Detector executable
    pub command: PathBuf,
    /// Additional arguments for the detector
    pub extra_args: Vec<String>,
    /// Address the worker binds
    pub host: String,
    /// Port the worker binds
    pub port: u16,
    /// How long the worker may take to become healthy
    pub startup_timeout: Duration,
    /// Timeout for a prediction request
    pub request_timeout: Duration,
    /// Delay between startup health probes
    pub poll_interval: Duration,
}

impl Default for ProcessWorkerConfig {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

impl ProcessWorkerConfig {
    /// Build from the `[worker]` configuration section
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            command: config.command.clone(),
            extra_args: config.extra_args.clone(),
            host: config.host.clone(),
            port: config.port,
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            poll_interval: Duration::from_millis(500),
        }
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Starts detector worker processes
pub struct ProcessDetectorLoader {
    config: ProcessWorkerConfig,
    health: HealthChecker,
    client: reqwest::Client,
}

impl ProcessDetectorLoader {
    /// Create a new process loader
    pub fn new(config: ProcessWorkerConfig) -> DustwatchResult<Self> {
        let health = HealthChecker::new("/health", Duration::from_secs(2))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DustwatchError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            health,
            client,
        })
    }

    /// Build the command to start a worker
    fn build_command(&self, weights: &Path) -> Command {
        let mut cmd = Command::new(&self.config.command);

        cmd.arg("--weights").arg(weights);
        cmd.arg("--host").arg(&self.config.host);
        cmd.arg("--port").arg(self.config.port.to_string());

        for arg in &self.config.extra_args {
            cmd.arg(arg);
        }

        // Worker output goes to the daemon's own streams
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        cmd
    }

    async fn wait_ready(&self, name: &str, child: &mut Child) -> DustwatchResult<()> {
        let base_url = self.config.base_url();
        let deadline = Instant::now() + self.config.startup_timeout;

        loop {
            if let Some(status) = child.try_wait()? {
                return Err(DustwatchError::LoadFailed {
                    model: name.to_string(),
                    reason: format!("detector exited during startup ({})", status),
                });
            }

            let probe = self.health.probe(&base_url).await;
            if probe.is_healthy() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(DustwatchError::LoadFailed {
                    model: name.to_string(),
                    reason: format!(
                        "detector not ready after {:?} (last probe: {})",
                        self.config.startup_timeout, probe
                    ),
                });
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl DetectorLoader for ProcessDetectorLoader {
    async fn load(&self, name: &str, weights: &Path) -> DustwatchResult<Arc<dyn Detector>> {
        info!(
            model = name,
            weights = %weights.display(),
            port = self.config.port,
            "Starting detector process"
        );

        let mut cmd = self.build_command(weights);
        let mut child = cmd.spawn().map_err(|e| {
            error!(model = name, error = %e, "Failed to spawn detector process");
            DustwatchError::LoadFailed {
                model: name.to_string(),
                reason: format!("failed to spawn {}: {}", self.config.command.display(), e),
            }
        })?;

        debug!(model = name, pid = child.id().unwrap_or(0), "Detector process spawned");

        if let Err(e) = self.wait_ready(name, &mut child).await {
            warn!(model = name, error = %e, "Detector failed to start");
            let _ = child.kill().await;
            return Err(e);
        }

        info!(model = name, pid = child.id().unwrap_or(0), "Detector ready");

        Ok(Arc::new(ProcessDetector::new(
            name.to_string(),
            self.config.base_url(),
            Some(child),
            self.client.clone(),
        )))
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    detections: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    xyxy: [f32; 4],
    confidence: f32,
}

/// A running detector worker
pub struct ProcessDetector {
    name: String,
    base_url: String,
    child: Mutex<Option<Child>>,
    client: reqwest::Client,
}

impl ProcessDetector {
    fn new(name: String, base_url: String, child: Option<Child>, client: reqwest::Client) -> Self {
        Self {
            name,
            base_url,
            child: Mutex::new(child),
            client,
        }
    }

    fn child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Detector for ProcessDetector {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn detect(&self, png: &[u8], params: &DetectionParams) -> DustwatchResult<Vec<Detection>> {
        let mut query = vec![
            ("conf", params.confidence.to_string()),
            ("iou", params.iou.to_string()),
        ];
        if let Some(size) = params.image_size {
            query.push(("imgsz", size.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(png.to_vec())
            .send()
            .await
            .map_err(|e| DustwatchError::Inference(format!("detector request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DustwatchError::Inference(format!(
                "detector returned {}: {}",
                status, body
            )));
        }

        let prediction: PredictResponse = response
            .json()
            .await
            .map_err(|e| DustwatchError::Inference(format!("invalid detector response: {}", e)))?;

        Ok(prediction
            .detections
            .into_iter()
            .map(|d| Detection::from_score(d.confidence, BoundingBox::from_xyxy(d.xyxy)))
            .collect())
    }

    fn is_alive(&self) -> bool {
        let mut child = self.child();
        match child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn release(&self) {
        let child = self.child().take();
        if let Some(mut child) = child {
            info!(model = %self.name, pid = child.id().unwrap_or(0), "Stopping detector process");
            if let Err(e) = child.kill().await {
                warn!(model = %self.name, error = %e, "Failed to stop detector process");
            }
        }
    }
}
