//! REST API handlers

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{HeaderValue, Method, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use dustwatch_core::{
    ApiConfig, DeploymentMode, Detection, DetectionConfig, DustwatchError, DustwatchResult,
    ModelEntry,
};
use dustwatch_runtime::{ActiveModelCache, CacheStatus};
use dustwatch_store::{ModelPolicy, ModelResolver};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::imaging;
use image::RgbImage;

/// Multipart framing allowance on top of the image size limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub cache: Arc<ActiveModelCache>,
    pub policy: ModelPolicy,
    pub resolver: Arc<ModelResolver>,
    pub detection: DetectionConfig,
    pub max_upload_bytes: usize,
}

/// Create the API router
pub fn create_router(state: Arc<AppState>, api: &ApiConfig) -> Router {
    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD;

    let router = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/models/active", delete(evict_model))
        .route("/api/detect", post(detect_dust_storm))
        .route("/api/inference-time", post(inference_time))
        .route("/api/status", get(get_status))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if api.cors_enabled {
        router.layer(cors_layer(&api.cors_origins))
    } else {
        router
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
}

/// Fields of a detection upload
struct Upload {
    image: Vec<u8>,
    model: Option<String>,
}

/// An oversized body surfaces as a multipart read error; report it as a bad image
fn image_read_error(err: MultipartError, max_size: usize) -> ApiError {
    let message = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        format!("Image data is too large (max: {} bytes)", max_size)
    } else {
        format!("Failed to read image: {}", err)
    };
    ApiError::from(DustwatchError::InvalidImage(message))
}

async fn read_upload(mut multipart: Multipart, max_size: usize) -> Result<Upload, ApiError> {
    let mut image = None;
    let mut model = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(image_read_error(e, max_size))
            }
            Err(e) => {
                return Err(ApiError::bad_request(format!(
                    "Malformed multipart body: {}",
                    e
                )))
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| image_read_error(e, max_size))?;
                image = Some(bytes.to_vec());
            }
            Some("model") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read model: {}", e)))?;
                model = Some(text);
            }
            _ => {}
        }
    }

    let image = image
        .ok_or_else(|| ApiError::from(DustwatchError::InvalidImage("No image provided".into())))?;
    Ok(Upload { image, model })
}

/// Run CPU-bound image work off the async workers
async fn blocking<T, F>(work: F) -> DustwatchResult<T>
where
    F: FnOnce() -> DustwatchResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DustwatchError::Internal(format!("Image task failed: {}", e)))?
}

/// Decode an upload and re-encode it as the PNG sent to the detector
async fn prepare_image(bytes: Vec<u8>, max_size: usize) -> DustwatchResult<(RgbImage, Vec<u8>)> {
    blocking(move || {
        let image = imaging::decode_upload(&bytes, max_size)?;
        let png = imaging::encode_png(&image)?;
        Ok((image, png))
    })
    .await
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Backend is running".to_string(),
    })
}

/// Model listing response
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelEntry>,
    pub mode: DeploymentMode,
    pub default_model: String,
    pub active_model: Option<String>,
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.resolver.list(),
        mode: state.policy.mode(),
        default_model: state.policy.default_model().to_string(),
        active_model: state.cache.current_model(),
    })
}

async fn evict_model(State(state): State<Arc<AppState>>) -> StatusCode {
    state.cache.invalidate().await;
    StatusCode::NO_CONTENT
}

/// Detection response
#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub success: bool,
    /// Annotated image, base64 PNG
    pub image: String,
    pub detections: Vec<Detection>,
    pub model_used: String,
    pub model_requested: Option<String>,
    pub overridden: bool,
    pub request_id: Uuid,
}

async fn detect_dust_storm(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let upload = read_upload(multipart, state.max_upload_bytes).await?;
    let effective = state.policy.normalize(upload.model.as_deref());

    let (mut image, png) = prepare_image(upload.image, state.max_upload_bytes).await?;

    let detector = state
        .cache
        .get_model(&effective.name)
        .await
        .map_err(|e| ApiError::from(e).with_model(&effective.name))?;

    let detections = detector
        .detect(&png, &state.detection.detect_params())
        .await
        .map_err(|e| {
            warn!(request_id = %request_id, model = %effective.name, error = %e, "Detection failed");
            ApiError::from(e).with_model(&effective.name)
        })?;

    let (encoded, detections) = blocking(move || {
        imaging::draw_overlay(
            &mut image,
            &detections,
            imaging::OVERLAY_COLOR,
            imaging::OVERLAY_ALPHA,
        );
        Ok((imaging::to_base64_png(&image)?, detections))
    })
    .await?;

    info!(
        request_id = %request_id,
        model = %effective.name,
        detections = detections.len(),
        "Detection complete"
    );

    Ok(Json(DetectResponse {
        success: true,
        image: encoded,
        detections,
        model_used: effective.name,
        model_requested: upload.model,
        overridden: effective.overridden,
        request_id,
    }))
}

/// Inference timing response
#[derive(Debug, Serialize, Deserialize)]
pub struct InferenceTimeResponse {
    pub inference_time_ms: f64,
    pub model_used: String,
}

async fn inference_time(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<InferenceTimeResponse>, ApiError> {
    let upload = read_upload(multipart, state.max_upload_bytes).await?;
    let effective = state.policy.normalize(upload.model.as_deref());

    let (_, png) = prepare_image(upload.image, state.max_upload_bytes).await?;

    let detector = state
        .cache
        .get_model(&effective.name)
        .await
        .map_err(|e| ApiError::from(e).with_model(&effective.name))?;

    let start = Instant::now();
    detector
        .detect(&png, &state.detection.timing_params())
        .await
        .map_err(|e| ApiError::from(e).with_model(&effective.name))?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    Ok(Json(InferenceTimeResponse {
        inference_time_ms: (elapsed_ms * 100.0).round() / 100.0,
        model_used: effective.name,
    }))
}

/// System status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub mode: DeploymentMode,
    pub cache: CacheStatus,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.policy.mode(),
        cache: state.cache.status(),
    })
}
