// gamedetect/core/api/src/types.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use gamedetect_classifier::{ClassifierError, Prediction};
use gamedetect_service::{SelfTestReport, ServiceError, SweepStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of a successful `POST /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub label: String,
    pub confidence: f32,
}

impl From<Prediction> for ClassifyResponse {
    fn from(prediction: Prediction) -> Self {
        Self {
            label: prediction.label,
            confidence: prediction.confidence,
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

/// `GET /selftest`
#[derive(Debug, Serialize, Deserialize)]
pub struct SelfTestResponse {
    pub status: SweepStatus,
    pub report: Option<SelfTestReport>,
}

/// `GET /health`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
    pub self_test: SweepStatus,
}

/// Failures a handler turns into an HTTP response
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("no image provided")]
    MissingImage,

    #[error("malformed upload: {0}")]
    BadUpload(String),

    #[error("upload exceeds the size limit")]
    PayloadTooLarge,

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingImage | ApiError::BadUpload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Service(ServiceError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Service(ServiceError::Classification(e)) => match e {
                ClassifierError::InvalidImage(_) => StatusCode::BAD_REQUEST,
                ClassifierError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::MissingImage | ApiError::BadUpload(_) | ApiError::PayloadTooLarge => {
                "invalid_request_error"
            }
            ApiError::Service(ServiceError::Timeout(_)) => "timeout_error",
            ApiError::Service(ServiceError::Classification(ClassifierError::InvalidImage(_))) => {
                "invalid_image_error"
            }
            ApiError::Service(ServiceError::Classification(ClassifierError::Closed)) => {
                "unavailable_error"
            }
            ApiError::Service(_) => "classification_error",
        }
    }

    fn code(&self) -> Option<String> {
        match self {
            ApiError::MissingImage => Some("missing_image".to_string()),
            ApiError::BadUpload(_) => Some("bad_upload".to_string()),
            ApiError::PayloadTooLarge => Some("payload_too_large".to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: self.kind().to_string(),
                code: self.code(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
