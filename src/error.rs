//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: missing 'subscriber' parameter",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                |
/// |-----------|-------------------|----------------------------|
/// | 1000–1999 | Validation        | 400 Bad Request            |
/// | 2000–2999 | Not Found         | 404 Not Found              |
/// | 3000–3999 | Server            | 500 Internal Server Error  |
/// | 4000–4999 | Observer-Specific | 409 Conflict               |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No handler is registered under the requested name.
    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    /// A handler returned something other than a row list, a single
    /// row object or a paginated envelope.
    #[error("observable handlers must return an object or a list of objects")]
    MalformedResult,

    /// A result row is missing the configured primary key field.
    #[error("observable handler did not return primary key field '{0}'")]
    MissingPrimaryKeyField(String),

    /// The atomic subscribe statement kept hitting foreign-key
    /// violations from concurrent deletions and ran out of retries.
    #[error("could not subscribe to observer {0}: concurrent deletion race persisted")]
    SubscribeConflict(String),

    /// Handler signalled that the requested resource does not exist.
    #[error("resource not found")]
    NotFound,

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::MalformedResult => 1002,
            Self::MissingPrimaryKeyField(_) => 1003,
            Self::UnknownHandler(_) => 2001,
            Self::NotFound => 2002,
            Self::PersistenceError(_) => 3001,
            Self::Internal(_) => 3000,
            Self::SubscribeConflict(_) => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::MalformedResult | Self::MissingPrimaryKeyField(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownHandler(_) | Self::NotFound => StatusCode::NOT_FOUND,
            Self::SubscribeConflict(_) => StatusCode::CONFLICT,
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
