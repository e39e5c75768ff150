use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON body returned for every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Errors produced by the checkout services.
///
/// The variants follow the checkout error taxonomy: user-correctable input
/// errors, precondition errors (no session), persistence errors, and
/// settlement errors. Notifier failures are logged only and never appear
/// here.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Shipping address required")]
    AddressRequired,

    #[error("Coupon rejected: {0}")]
    CouponRejected(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ValidationError(_)
            | ServiceError::InvalidInput(_)
            | ServiceError::AddressRequired
            | ServiceError::CouponRejected(_) => StatusCode::BAD_REQUEST,
            ServiceError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            ServiceError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            ServiceError::DatabaseError(_)
            | ServiceError::SerializationError(_)
            | ServiceError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to surface to the user. Persistence failures are reported
    /// generically; the logged error carries the detail.
    fn public_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                "Something went wrong, please try again".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: self.public_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}
