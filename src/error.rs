use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::validation::ValidationError;

/// Application error. Every variant maps to a stable machine code and an
/// HTTP status; the JSON envelope is always `{success: false, message, code}`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A conditional status transition failed for a non-idempotent reason.
    #[error("Conflict: {0}")]
    ConflictOfState(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    #[error("Insufficient liquidity")]
    InsufficientLiquidity { max_order_ngn: Option<i64> },

    /// Tokens were received but the NGN transfer could not be issued.
    #[error("Payout failed: {0}")]
    PayoutFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConflictOfState(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ConfigMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InsufficientLiquidity { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::PayoutFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code; never renamed once shipped.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ConflictOfState(_) => "CONFLICT_OF_STATE",
            AppError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::ConfigMissing(_) => "CONFIG_MISSING",
            AppError::InsufficientLiquidity { .. } => "INSUFFICIENT_LIQUIDITY",
            AppError::PayoutFailed(_) => "PAYOUT_FAILED",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn public_message(&self) -> String {
        let production = std::env::var("APP_ENV")
            .map(|env| env == "production")
            .unwrap_or(false);

        if production && self.status_code().is_server_error() {
            return "Internal server error".to_string();
        }

        match self {
            AppError::InsufficientLiquidity { .. } => {
                "Insufficient liquidity to process this order".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "success": false,
            "message": self.public_message(),
            "code": self.code(),
        });

        if let AppError::InsufficientLiquidity {
            max_order_ngn: Some(max),
        } = &self
        {
            body["maxOrderNGN"] = json!(max);
        }

        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }

        (status, Json(body)).into_response()
    }
}
