//! Error responses

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dustwatch_core::DustwatchError;
use serde::{Deserialize, Serialize};

/// Seconds a client should wait before retrying a transient fetch failure
const RETRY_AFTER_SECS: &str = "30";

/// JSON body of every error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Error returned by request handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error_type: &'static str,
    message: String,
    model: Option<String>,
    transient: bool,
}

impl ApiError {
    /// Malformed request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error_type: "invalid_request",
            message: message.into(),
            model: None,
            transient: false,
        }
    }

    /// Attach the model the request was served with
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }
}

impl From<DustwatchError> for ApiError {
    fn from(err: DustwatchError) -> Self {
        let (status, error_type) = match &err {
            e if e.is_unavailable() => (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable"),
            DustwatchError::InvalidImage(_) => (StatusCode::BAD_REQUEST, "invalid_image"),
            DustwatchError::Inference(_) => (StatusCode::INTERNAL_SERVER_ERROR, "detection_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        Self {
            status,
            error_type,
            message: err.to_string(),
            model: None,
            transient: err.is_transient(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            error_type: self.error_type.to_string(),
            model: self.model,
        };

        let mut response = (self.status, Json(body)).into_response();
        if self.transient {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (DustwatchError::ModelNotFound("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                DustwatchError::LoadFailed {
                    model: "x".into(),
                    reason: "y".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (DustwatchError::InvalidImage("x".into()), StatusCode::BAD_REQUEST),
            (DustwatchError::Inference("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (DustwatchError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_transient_failure_sets_retry_after() {
        let err = ApiError::from(DustwatchError::FetchFailed {
            url: "https://example.com/best.pt".into(),
            reason: "timeout".into(),
        })
        .with_model("best.pt");
        assert_eq!(err.error_type, "model_unavailable");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");
    }
}
