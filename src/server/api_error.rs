//! Standardized API error responses for all Spectre endpoints.
//!
//! # Response Format
//!
//! All error responses follow this JSON structure:
//!
//! ```json
//! {
//!   "error": {
//!     "code": "LICENSE_NOT_FOUND",
//!     "message": "license not found: SPK-...",
//!     "details": null
//!   }
//! }
//! ```
//!
//! The `details` field is optional and may contain additional context.
//! A failed verification is not an error and does not use this body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::LicenseError;
use crate::validation::ValidationError;

/// Machine-readable error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // === License State Errors (4xx) ===
    /// License key was not found
    LicenseNotFound,
    /// Balance does not cover the requested amount
    InsufficientCredits,

    // === Validation Errors (400) ===
    /// Request payload is invalid or malformed
    InvalidRequest,
    /// A field value is invalid
    InvalidField,
    /// An edit carried no fields
    NoFields,

    // === Authentication Errors (401) ===
    /// Admin secret missing or wrong
    Unauthorized,

    // === Resource Errors (409) ===
    /// License key already exists
    Conflict,
    /// A trial was already issued for this machine or identity
    TrialAlreadyIssued,

    // === Server Errors (5xx) ===
    /// Store is unreachable; retryable
    StorageUnavailable,
    /// A stored record could not be decoded
    DataIntegrity,
    /// Server configuration error
    ConfigError,
    /// Unexpected server failure
    InternalError,
}

impl ErrorCode {
    /// Returns the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            ErrorCode::InvalidRequest | ErrorCode::InvalidField | ErrorCode::NoFields => {
                StatusCode::BAD_REQUEST
            }

            // 401 Unauthorized
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            ErrorCode::InsufficientCredits => StatusCode::FORBIDDEN,

            // 404 Not Found
            ErrorCode::LicenseNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            ErrorCode::Conflict | ErrorCode::TrialAlreadyIssued => StatusCode::CONFLICT,

            // 500 Internal Server Error
            ErrorCode::DataIntegrity | ErrorCode::ConfigError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            // 503 Service Unavailable
            ErrorCode::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns a default human-readable message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::LicenseNotFound => "The requested license does not exist",
            ErrorCode::InsufficientCredits => "Insufficient credits",
            ErrorCode::InvalidRequest => "Request payload is invalid",
            ErrorCode::InvalidField => "A field value is invalid",
            ErrorCode::NoFields => "No fields to update",
            ErrorCode::Unauthorized => "Admin secret is missing or invalid",
            ErrorCode::Conflict => "License key already exists",
            ErrorCode::TrialAlreadyIssued => {
                "A trial was already issued for this machine or identity"
            }
            ErrorCode::StorageUnavailable => "License store is unavailable, retry later",
            ErrorCode::DataIntegrity => "A stored license record is malformed",
            ErrorCode::ConfigError => "Server configuration error",
            ErrorCode::InternalError => "An unexpected error occurred",
        }
    }
}

/// The inner error object containing code, message, and optional details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (field name, balances, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Standardized API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorBody,
}

impl ApiError {
    /// Creates a new API error with the default message for `code`.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: code.default_message().to_string(),
                details: None,
            },
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.error.code.status_code()
    }

    /// Invalid request error with field details.
    pub fn invalid_field(field: &str, reason: &str) -> Self {
        Self::with_details(
            ErrorCode::InvalidField,
            format!("Invalid value for '{}': {}", field, reason),
            serde_json::json!({ "field": field }),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.error.code, self.error.message)
    }
}

impl std::error::Error for ApiError {}

impl From<LicenseError> for ApiError {
    fn from(err: LicenseError) -> Self {
        match err {
            LicenseError::Validation(e) => ApiError::invalid_field(&e.field, &e.message),
            LicenseError::NotFound(key) => ApiError::with_message(
                ErrorCode::LicenseNotFound,
                format!("License '{}' not found", key),
            ),
            LicenseError::Conflict(msg) => ApiError::with_message(ErrorCode::Conflict, msg),
            LicenseError::TrialAlreadyIssued => ApiError::new(ErrorCode::TrialAlreadyIssued),
            LicenseError::NoFields => ApiError::new(ErrorCode::NoFields),
            LicenseError::InsufficientCredits {
                requested,
                available,
            } => ApiError::with_details(
                ErrorCode::InsufficientCredits,
                format!("Requested {requested} credits, {available} available"),
                serde_json::json!({ "requested": requested, "available": available }),
            ),
            LicenseError::Unauthorized => ApiError::new(ErrorCode::Unauthorized),
            LicenseError::StorageUnavailable(msg) => {
                // Store details stay in the log.
                error!("Storage unavailable: {msg}");
                ApiError::new(ErrorCode::StorageUnavailable)
            }
            LicenseError::DataIntegrity(msg) => {
                error!("Data integrity error: {msg}");
                ApiError::with_message(ErrorCode::DataIntegrity, msg)
            }
            LicenseError::ConfigError(msg) => ApiError::with_message(ErrorCode::ConfigError, msg),
            LicenseError::ServerError(msg) => {
                error!("Server error: {msg}");
                ApiError::new(ErrorCode::InternalError)
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        LicenseError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_status_mapping() {
        assert_eq!(
            ErrorCode::LicenseNotFound.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ErrorCode::NoFields.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::InsufficientCredits.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ErrorCode::TrialAlreadyIssued.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::StorageUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn api_error_serialization() {
        let err = ApiError::new(ErrorCode::LicenseNotFound);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("LICENSE_NOT_FOUND"));
        assert!(!json.contains("details"));
    }

    #[test]
    fn validation_error_carries_field() {
        let api_err: ApiError = LicenseError::from(ValidationError::new("amount", "too small")).into();
        assert_eq!(api_err.error.code, ErrorCode::InvalidField);
        assert_eq!(api_err.error.details.unwrap()["field"], "amount");
    }

    #[test]
    fn insufficient_credits_reports_balances() {
        let api_err: ApiError = LicenseError::InsufficientCredits {
            requested: 10,
            available: 3,
        }
        .into();
        let details = api_err.error.details.unwrap();
        assert_eq!(details["requested"], 10);
        assert_eq!(details["available"], 3);
    }

    #[test]
    fn storage_details_are_hidden() {
        let api_err: ApiError =
            LicenseError::StorageUnavailable("disk I/O error at /var/db".into()).into();
        assert!(!api_err.error.message.contains("/var/db"));
    }

    #[test]
    fn server_error_is_internal() {
        let api_err: ApiError =
            LicenseError::ServerError("failed to bind 0.0.0.0:80: permission denied".into()).into();
        assert_eq!(api_err.error.code, ErrorCode::InternalError);
        assert_eq!(api_err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api_err.error.message.contains("0.0.0.0"));
    }
}
