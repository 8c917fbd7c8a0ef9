//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **AppError**: what HTTP handlers return. It knows how to turn itself into a
//!   JSON error response through actix-web's `ResponseError` trait.
//! - **LiveError**: the failure taxonomy of a live voice session (microphone
//!   permission, connection setup, inbound audio decoding, remote close/error).
//!   The WebSocket layer turns these into `error` messages for the browser.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces you to handle both success and failure cases
//! - **No exceptions**: Rust doesn't have try/catch, it uses Result instead
//!
//! ### thiserror
//! - `#[derive(Error)]` generates the `Display` and `std::error::Error` impls
//!   from the `#[error("...")]` attributes, so each variant documents its own message.
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types (used by `?`)
//! - **ResponseError trait**: Converts errors to HTTP responses

use crate::live::controller::SessionPhase;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **Upstream**: The hosted model could not serve the request (502 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::BadRequest("Invalid JSON".to_string()));
/// ```
#[derive(Debug, Error)]
pub enum AppError {
    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Client sent invalid or malformed data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// User input failed validation rules
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The hosted model failed or returned nothing usable
    #[error("Upstream service error: {0}")]
    Upstream(String),
}

/// Converts our custom errors into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Internal → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
/// - Upstream → 502 (Bad Gateway)
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Port must be greater than 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "validation_error",
                msg.clone(),
            ),
            AppError::Upstream(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,  // 502
                "upstream_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// When you use `?` with an anyhow::Error inside a handler, it becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always caused by the client, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Failure taxonomy of a live voice session.
///
/// ## Propagation rules:
/// - Acquisition failures (`PermissionDenied`, `ConnectionFailed`, `DeviceUnavailable`)
///   abort `start()` and are returned to the caller.
/// - `DecodeFailure` is logged and the offending chunk is skipped.
/// - `RemoteClosed` / `RemoteError` always route through the session teardown.
/// - `MalformedContextSnapshot` never fails anything: a fallback directive is used.
///
/// `Clone + PartialEq` so the controller can remember why the last session ended
/// and tests can compare outcomes directly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LiveError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("failed to decode inbound audio: {0}")]
    DecodeFailure(String),

    #[error("remote endpoint closed the session")]
    RemoteClosed,

    #[error("remote endpoint error: {0}")]
    RemoteError(String),

    #[error("context snapshot is not valid JSON: {0}")]
    MalformedContextSnapshot(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("a live session is already {0}")]
    SessionBusy(SessionPhase),

    #[error("no live session is active")]
    NotActive,

    #[error("session start was cancelled by a stop request")]
    Cancelled,
}

impl LiveError {
    /// Machine-readable code sent to WebSocket clients.
    pub fn code(&self) -> &'static str {
        match self {
            LiveError::PermissionDenied(_) => "permission_denied",
            LiveError::ConnectionFailed(_) => "connection_failed",
            LiveError::DecodeFailure(_) => "decode_failure",
            LiveError::RemoteClosed => "remote_closed",
            LiveError::RemoteError(_) => "remote_error",
            LiveError::MalformedContextSnapshot(_) => "malformed_context_snapshot",
            LiveError::DeviceUnavailable(_) => "device_unavailable",
            LiveError::SessionBusy(_) => "session_busy",
            LiveError::NotActive => "session_inactive",
            LiveError::Cancelled => "cancelled",
        }
    }
}

/// Type alias for Results that use our HTTP error type.
pub type AppResult<T> = Result<T, AppError>;
