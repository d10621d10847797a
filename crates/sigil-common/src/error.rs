//! Centralized error types for Sigil.
//!
//! Uses `thiserror` for ergonomic error definitions and provides the JSON
//! error envelope (`{"status":"ERROR","responseObject":{code,message}}`) that
//! clients parse.
//!
//! Note that a *failed signature verification is not an error* — it is a
//! regular response with `signatureValid=false`. The variants here cover the
//! cases where an operation cannot produce a response at all.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Core application error type used across all Sigil services.
#[derive(Debug, thiserror::Error)]
pub enum SigilError {
    // === Lookup errors ===
    #[error("Activation not found")]
    ActivationNotFound,

    #[error("Application not found")]
    ApplicationNotFound,

    // === Activation lifecycle errors ===
    #[error("Operation not allowed in current activation state")]
    InvalidActivationState,

    #[error("Activation expired")]
    ActivationExpired,

    // === Input errors ===
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    // === Crypto errors ===
    #[error("Cryptographic operation failed: {0}")]
    Crypto(#[from] sigil_crypto::CryptoError),

    // === Generator exhaustion ===
    #[error("Unable to generate activation ID")]
    UnableToGenerateActivationId,

    #[error("Unable to generate activation code")]
    UnableToGenerateActivationCode,

    // === Access control ===
    #[error("Unauthorized")]
    Unauthorized,

    // === Server-side configuration ===
    #[error("Server configuration error: {message}")]
    Config { message: String },

    // === Infrastructure errors ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Inner object of the JSON error envelope.
#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Full JSON error envelope sent to clients.
#[derive(Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    #[serde(rename = "responseObject")]
    response_object: ErrorBody,
}

impl SigilError {
    /// Map error to HTTP status code.
    ///
    /// Business failures (unknown activation, wrong state, expiry) are 400s:
    /// the request was well-formed HTTP but cannot be served. Only
    /// infrastructure problems surface as 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Database(_) | Self::Internal(_) | Self::Config { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Error code string for programmatic handling by clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ActivationNotFound => "ERR_ACTIVATION_NOT_FOUND",
            Self::ApplicationNotFound => "ERR_APPLICATION_NOT_FOUND",
            Self::InvalidActivationState => "ERR_ACTIVATION_INVALID_STATE",
            Self::ActivationExpired => "ERR_ACTIVATION_EXPIRED",
            Self::InvalidInput { .. } => "ERR_INVALID_INPUT",
            Self::Crypto(_) => "ERR_CRYPTO_FAILURE",
            Self::UnableToGenerateActivationId => "ERR_UNABLE_TO_GENERATE_ACTIVATION_ID",
            Self::UnableToGenerateActivationCode => "ERR_UNABLE_TO_GENERATE_ACTIVATION_CODE",
            Self::Unauthorized => "ERR_UNAUTHORIZED",
            Self::Config { .. } => "ERR_CONFIGURATION",
            Self::Database(_) => "ERR_DATABASE",
            Self::Internal(_) => "ERR_INTERNAL",
        }
    }
}

impl IntoResponse for SigilError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't leak internal details to clients
        let message = match &self {
            SigilError::Database(e) => {
                tracing::error!("Database error: {e}");
                "An internal error occurred".to_string()
            }
            SigilError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                "An internal error occurred".to_string()
            }
            SigilError::Config { message } => {
                tracing::error!("Configuration error: {message}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorEnvelope {
            status: "ERROR",
            response_object: ErrorBody {
                code: self.error_code(),
                message,
            },
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results using SigilError.
pub type SigilResult<T> = Result<T, SigilError>;
