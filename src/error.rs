//! Error taxonomy for the extraction pipeline.
//!
//! Format/validation errors fail fast before any external call. Transient
//! backend errors are retried once; in dual-backend modes a persistently
//! failing backend degrades the request to a partial result instead of
//! aborting it. Deadline expiry is signalled out-of-band (the cascade returns
//! its partial state) and never surfaces as a failure to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("document is corrupt or unparseable: {0}")]
    DocumentCorrupt(String),

    #[error("document source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("extraction backend failed: {0}")]
    ExtractionBackendError(String),

    #[error("document analysis failed: {0}")]
    AnalysisError(String),

    #[error("model call failed: {0}")]
    ModelError(String),

    #[error("invalid strategy mode: {0}")]
    InvalidStrategyMode(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ExtractError {
    /// HTTP status for the caller-facing surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExtractError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ExtractError::DocumentCorrupt(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ExtractError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
            ExtractError::ExtractionBackendError(_)
            | ExtractError::AnalysisError(_)
            | ExtractError::ModelError(_) => StatusCode::BAD_GATEWAY,
            ExtractError::InvalidStrategyMode(_) | ExtractError::Invalid(_) => {
                StatusCode::BAD_REQUEST
            }
            // Deadlines yield partial results upstream; reaching here is a bug.
            ExtractError::DeadlineExceeded => StatusCode::INTERNAL_SERVER_ERROR,
            ExtractError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable reason, distinct from the internal error kind.
    pub fn reason(&self) -> String {
        match self {
            ExtractError::UnsupportedFormat(f) => {
                format!("The document format '{f}' is not supported. Supported formats: PDF, PNG, JPEG, TIFF, WEBP, DOCX, XLSX, PPTX.")
            }
            ExtractError::DocumentCorrupt(d) => {
                format!("The document could not be read; it appears to be damaged or incomplete ({d}).")
            }
            ExtractError::SourceUnavailable(d) => {
                format!("The document could not be retrieved from the given reference ({d}).")
            }
            ExtractError::ExtractionBackendError(d) => {
                format!("The extraction service did not return a usable result ({d}).")
            }
            ExtractError::AnalysisError(d) => {
                format!("Text analysis of the document failed ({d}).")
            }
            ExtractError::ModelError(d) => {
                format!("The model did not return a usable response ({d}).")
            }
            ExtractError::InvalidStrategyMode(m) => {
                format!("Unknown strategy mode '{m}'. Expected one of: vision_only, text_plus_vision, hybrid_consensus.")
            }
            ExtractError::DeadlineExceeded => {
                "Processing did not finish within the requested deadline.".to_string()
            }
            ExtractError::Invalid(d) => format!("The request is invalid: {d}."),
            ExtractError::Internal(e) => format!("An internal error occurred ({e})."),
        }
    }
}

impl IntoResponse for ExtractError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "failed",
            "error": self.to_string(),
            "reason": self.reason(),
        }));
        (self.status_code(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
