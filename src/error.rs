//! # Error Handling
//!
//! Defines the application error type and how it is converted to HTTP responses.
//!
//! ## Layers:
//! - Domain modules return their own `thiserror` enums (`DocumentError`,
//!   `InferenceError`, `AudioError`, `ArtifactError`)
//! - Startup and glue code use `anyhow`
//! - Handlers return [`AppError`], which every one of the above converts into
//!
//! ## JSON Response Format:
//! All errors return JSON with a consistent structure:
//! ```json
//! {
//!   "error": {
//!     "type": "template_missing",
//!     "message": "Template file not found: backend/templates/hr_template.docx",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use crate::artifacts::ArtifactError;
use crate::audio::AudioError;
use crate::document::DocumentError;
use crate::inference::InferenceError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **TemplateMissing**: built-in or custom template could not be found (500)
/// - **TranscriptionFailed**: audio could not be decoded or transcribed (500)
/// - **InferenceUnavailable**: field inference could not be reached (502, or 503
///   when no credential is configured)
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **NotFound**: Requested resource doesn't exist (404)
/// - **ConfigError**: Configuration problems (500)
/// - **ValidationError**: Data validation failed (400)
#[derive(Debug)]
pub enum AppError {
    TemplateMissing(String),

    TranscriptionFailed(String),

    InferenceUnavailable {
        message: String,
        /// No API key configured, as opposed to an upstream failure.
        missing_credential: bool,
    },

    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::TemplateMissing(_) => "template_missing",
            AppError::TranscriptionFailed(_) => "transcription_failed",
            AppError::InferenceUnavailable { .. } => "inference_unavailable",
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::TemplateMissing(msg)
            | AppError::TranscriptionFailed(msg)
            | AppError::InferenceUnavailable { message: msg, .. }
            | AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::ConfigError(msg)
            | AppError::ValidationError(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::TemplateMissing(msg) => write!(f, "Template missing: {}", msg),
            AppError::TranscriptionFailed(msg) => write!(f, "Transcription failed: {}", msg),
            AppError::InferenceUnavailable { message, .. } => {
                write!(f, "Inference unavailable: {}", message)
            }
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Maps each error to its HTTP status and the shared JSON body.
///
/// ## HTTP Status Code Mapping:
/// - TemplateMissing/TranscriptionFailed/Internal/ConfigError → 500
/// - InferenceUnavailable → 502, or 503 without a credential
/// - BadRequest/ValidationError → 400
/// - NotFound → 404
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::TemplateMissing(_)
            | AppError::TranscriptionFailed(_)
            | AppError::Internal(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InferenceUnavailable { missing_credential: true, .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::InferenceUnavailable { .. } => StatusCode::BAD_GATEWAY,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// When you use `?` with an anyhow::Error, it becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// JSON parsing errors are almost always due to the client sending malformed
/// data, so they become 400 rather than 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// A template that is not a readable package is the caller's fault when
/// uploaded; stored templates that fail to open are reported as internal by
/// the service before reaching this conversion.
impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Io(e) => AppError::Internal(format!("Document I/O error: {}", e)),
            other => AppError::BadRequest(format!("Invalid document: {}", other)),
        }
    }
}

impl From<InferenceError> for AppError {
    fn from(err: InferenceError) -> Self {
        let missing_credential = matches!(err, InferenceError::MissingCredential);
        AppError::InferenceUnavailable {
            message: err.to_string(),
            missing_credential,
        }
    }
}

impl From<AudioError> for AppError {
    fn from(err: AudioError) -> Self {
        AppError::TranscriptionFailed(err.to_string())
    }
}

impl From<ArtifactError> for AppError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::InvalidId(_) => AppError::BadRequest(err.to_string()),
            other => AppError::Internal(format!("Artifact store error: {}", other)),
        }
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
