use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::authz::MatrixValidationError;
use crate::db::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {message}")]
    Forbidden {
        message: String,
        reason_key: Option<String>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("validation error on {field}: {message}")]
    Validation { field: String, message: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("storage error")]
    Store(#[from] StoreError),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            reason_key: None,
        }
    }

    /// Forbidden carrying the stable machine-readable key of a permission denial.
    pub fn permission_denied(message: impl Into<String>, reason_key: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            reason_key: Some(reason_key.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason_key: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let AppError::Store(ref err) = self {
            tracing::error!(error = %err, "storage failure while handling request");
        }

        let message = self.to_string();
        let (error, field, reason_key) = match self {
            AppError::Unauthorized(_) => ("unauthorized", None, None),
            AppError::Forbidden { reason_key, .. } => ("forbidden", None, reason_key),
            AppError::NotFound(_) => ("not_found", None, None),
            AppError::BadRequest(_) => ("bad_request", None, None),
            AppError::Validation { field, .. } => ("validation", Some(field), None),
            AppError::Configuration(_) => ("configuration", None, None),
            AppError::Token(_) => ("token", None, None),
            AppError::Store(_) => ("storage", None, None),
            AppError::Internal(_) => ("internal", None, None),
        };

        let payload = ErrorResponse {
            error: error.to_string(),
            message,
            field,
            reason_key,
        };

        (status, Json(payload)).into_response()
    }
}

impl From<MatrixValidationError> for AppError {
    fn from(value: MatrixValidationError) -> Self {
        Self::Validation {
            field: value.field(),
            message: value.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
