use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy shared by every crate in the workspace. Each variant carries
/// a stable `code()` string (the `AUTH_*`/`CART_*`/`AUC_*`/`PAY_*`/`RES_*`/
/// `RATE_*`/`INT_*` prefixes) and maps to one HTTP status via `status_code()`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("email verification required")]
    EmailVerificationRequired,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state conflict: {code}: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("unauthorized: {code}: {message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("rate limited: {0}")]
    RateLimited(&'static str),

    #[error("upstream gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Error {
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Error::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Error::Unauthorized {
            code,
            message: message.into(),
        }
    }

    /// Stable error code surfaced to clients, per the `AUTH_*`/`CART_*`/
    /// `ORD_*`/`AUC_*`/`PAY_*`/`RES_*`/`RATE_*`/`INT_*` taxonomy.
    pub fn code(&self) -> String {
        match self {
            Error::Unauthenticated => "AUTH_UNAUTHENTICATED".to_string(),
            Error::Forbidden(_) => "AUTH_FORBIDDEN".to_string(),
            Error::EmailVerificationRequired => "AUTH_EMAIL_VERIFICATION_REQUIRED".to_string(),
            Error::Validation(_) => "VALIDATION_FAILED".to_string(),
            Error::NotFound(_) => "NOT_FOUND".to_string(),
            Error::Conflict { code, .. } => code.to_string(),
            Error::Unauthorized { code, .. } => code.to_string(),
            Error::RateLimited(op) => format!("RATE_{}", op.to_uppercase()),
            Error::GatewayUnavailable(_) => "INT_GATEWAY_UNAVAILABLE".to_string(),
            Error::Database(_) | Error::Redis(_) | Error::Serialization(_) | Error::Config(_) => {
                "INT_UNAVAILABLE".to_string()
            }
            Error::Internal(_) => "INT_INTERNAL".to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Unauthenticated | Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) | Error::EmailVerificationRequired => StatusCode::FORBIDDEN,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(_) | Error::Redis(_) | Error::Serialization(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
pub type ApiResult<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = %self.code(), "request failed");
        } else {
            tracing::warn!(error = %self, code = %self.code(), "request rejected");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            details: None,
            correlation_id: crate::correlation::current(),
        };
        (status, Json(body)).into_response()
    }
}
