//! CLI commands implementation

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Health response from API
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// Model entry from API
#[derive(Debug, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub url: String,
    pub source: String,
    pub available: bool,
}

/// Model listing from API
#[derive(Debug, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelEntry>,
    pub mode: String,
    pub default_model: String,
    pub active_model: Option<String>,
}

/// Single detection from API
#[derive(Debug, Deserialize)]
pub struct Detection {
    pub confidence: f64,
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
}

/// Detection response from API
#[derive(Debug, Deserialize)]
pub struct DetectResponse {
    pub image: String,
    pub detections: Vec<Detection>,
    pub model_used: String,
    pub overridden: bool,
    pub request_id: Uuid,
}

/// Timing response from API
#[derive(Debug, Deserialize)]
pub struct InferenceTimeResponse {
    pub inference_time_ms: f64,
    pub model_used: String,
}

/// Cache status from API
#[derive(Debug, Deserialize)]
pub struct CacheStatus {
    pub state: String,
    pub model: Option<String>,
    pub loaded_at: Option<String>,
}

/// Status response from API
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub mode: String,
    pub cache: CacheStatus,
}

/// Error body from API
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_type: String,
}

/// Turn a failed response into a readable message
fn describe_error(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => format!("{} ({}): {}", status, err.error_type, err.error),
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => format!("{}: {}", status, body),
    }
}

async fn fail(context: &str, response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{}: {}", context, describe_error(status, &body))
}

async fn upload_form(image: &PathBuf, model: Option<String>) -> Result<Form> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read {}", image.display()))?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let mut form = Form::new().part("image", Part::bytes(bytes).file_name(file_name));
    if let Some(model) = model {
        form = form.text("model", model);
    }
    Ok(form)
}

/// Check daemon health
pub async fn health(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/health")).send().await?;

    if response.status().is_success() {
        let health: HealthResponse = response.json().await?;
        println!("{}: {}", health.status, health.message);
        Ok(())
    } else {
        fail("Health check failed", response).await
    }
}

/// List registered models
pub async fn models(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/models")).send().await?;

    if !response.status().is_success() {
        return fail("Failed to list models", response).await;
    }

    let listing: ModelsResponse = response.json().await?;
    println!(
        "Mode: {}  Default: {}  Active: {}",
        listing.mode,
        listing.default_model,
        listing.active_model.as_deref().unwrap_or("-")
    );
    println!();
    println!("{:<20} {:<8} {:<10} URL", "NAME", "SOURCE", "ON DISK");
    println!("{}", "-".repeat(80));
    for model in listing.models {
        println!(
            "{:<20} {:<8} {:<10} {}",
            model.name,
            model.source,
            if model.available { "yes" } else { "no" },
            model.url
        );
    }

    Ok(())
}

/// Show daemon status
pub async fn status(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/api/status")).send().await?;

    if !response.status().is_success() {
        return fail("Failed to get status", response).await;
    }

    let status: StatusResponse = response.json().await?;
    println!("dustwatch v{}", status.version);
    println!();
    println!("Mode: {}", status.mode);
    match (status.cache.state.as_str(), status.cache.model) {
        ("loaded", Some(model)) => println!(
            "Active model: {} (loaded {})",
            model,
            status.cache.loaded_at.as_deref().unwrap_or("?")
        ),
        ("loading", Some(model)) => println!("Active model: {} (loading)", model),
        _ => println!("Active model: none"),
    }

    Ok(())
}

/// Run detection on an image
pub async fn detect(
    client: &ApiClient,
    image: PathBuf,
    model: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let form = upload_form(&image, model).await?;
    let response = client
        .client
        .post(client.url("/api/detect"))
        .multipart(form)
        .send()
        .await?;

    if !response.status().is_success() {
        return fail("Detection failed", response).await;
    }

    let result: DetectResponse = response.json().await?;
    println!(
        "Model: {}{}",
        result.model_used,
        if result.overridden { " (overridden)" } else { "" }
    );
    println!("Request: {}", result.request_id);

    if result.detections.is_empty() {
        println!("No dust storms detected");
    } else {
        println!();
        println!("{:<4} {:<12} BOX", "#", "CONFIDENCE");
        for (i, det) in result.detections.iter().enumerate() {
            let [x1, y1, x2, y2] = det.bbox;
            println!(
                "{:<4} {:<12} [{}, {}, {}, {}]",
                i + 1,
                format!("{:.2}%", det.confidence),
                x1,
                y1,
                x2,
                y2
            );
        }
    }

    if let Some(path) = output {
        let png = STANDARD
            .decode(result.image.as_bytes())
            .context("Daemon returned an invalid image")?;
        tokio::fs::write(&path, png)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("\nAnnotated image written to {}", path.display());
    }

    Ok(())
}

/// Measure inference time
pub async fn timing(client: &ApiClient, image: PathBuf, model: Option<String>) -> Result<()> {
    let form = upload_form(&image, model).await?;
    let response = client
        .client
        .post(client.url("/api/inference-time"))
        .multipart(form)
        .send()
        .await?;

    if !response.status().is_success() {
        return fail("Timing failed", response).await;
    }

    let result: InferenceTimeResponse = response.json().await?;
    println!("{}: {:.2} ms", result.model_used, result.inference_time_ms);
    Ok(())
}

/// Unload the active model
pub async fn evict(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .delete(client.url("/api/models/active"))
        .send()
        .await?;

    if response.status().is_success() {
        println!("Active model unloaded");
        Ok(())
    } else {
        fail("Failed to unload model", response).await
    }
}
