//! # Error Handling
//!
//! HTTP-facing error type and its conversion into JSON responses.
//!
//! Domain modules keep their own small error enums (`StoreError`,
//! `SessionError`, `RegistryError`, `PipelineError`); this module maps the
//! ones that can reach an HTTP handler onto status codes.
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "store_unavailable",
//!     "message": "history directory is not writable",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use crate::audio::session::RegistryError;
use crate::history::StoreError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Unexpected server-side failure
    Internal(String),

    /// Client sent invalid query parameters or body
    BadRequest(String),

    /// Requested resource does not exist
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// History persistence is down; never silently ignored
    StoreUnavailable(String),

    /// Too many concurrent recording sessions
    SessionLimit(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::StoreUnavailable(msg) => write!(f, "History store unavailable: {}", msg),
            AppError::SessionLimit(msg) => write!(f, "Session limit reached: {}", msg),
        }
    }
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::ConfigError(_) => "config_error",
            AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::SessionLimit(_) => "session_limit",
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::ConfigError(msg)
            | AppError::StoreUnavailable(msg)
            | AppError::SessionLimit(msg) => msg,
        }
    }
}

/// Status code mapping:
/// - Internal/ConfigError → 500
/// - BadRequest → 400
/// - NotFound → 404
/// - StoreUnavailable/SessionLimit → 503
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StoreUnavailable(_) | AppError::SessionLimit(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        AppError::SessionLimit(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
