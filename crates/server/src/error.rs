use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API-facing error taxonomy. Every handler returns this; the wire shape is
/// `{"error": {"code", "message", "details"?}}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("receipt rejected: {0}")]
    ReceiptInvalid(String),

    #[error("store rejected the request")]
    StoreRejected { store_code: String, message: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store credentials are not configured for this app")]
    CredentialMissing,

    #[error("crypto failure: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Auth(_) => "auth_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ReceiptInvalid(_) => "receipt_invalid",
            Self::StoreRejected { .. } => "store_rejected",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::CredentialMissing => "credential_missing",
            Self::Crypto(_) => "crypto_error",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ReceiptInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::StoreRejected { .. } => StatusCode::BAD_GATEWAY,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::CredentialMissing => StatusCode::PRECONDITION_REQUIRED,
            Self::Crypto(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {self}");
        }

        let details = match &self {
            ApiError::StoreRejected { store_code, .. } => {
                Some(json!({ "store_code": store_code }))
            }
            _ => None,
        };

        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Maps unique-index violations to Conflict, everything else to Internal.
pub fn db_error(err: sqlx::Error, conflict_message: &str) -> ApiError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return ApiError::Conflict(conflict_message.to_string());
        }
    }
    ApiError::Database(err)
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
