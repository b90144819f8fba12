//! Error types for the event pipeline and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerError;
use crate::services::crm::CrmError;
use crate::services::tenants::DirectoryError;

/// Failures that abort ingestion or processing of a whole event.
///
/// Field misses, action failures and rule timeouts are not errors; they are
/// recorded on the processing report and the event still completes.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("signature verification failed: {0}")]
    Authentication(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("no tenant could be resolved from the payload")]
    TenantResolution,
    #[error("tenant '{0}' is not configured")]
    UnknownTenant(String),
    #[error("{operation} timed out")]
    Timeout { operation: String },
    #[error("data source error: {0}")]
    DataSource(#[from] CrmError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("tenant directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("pipeline fault: {0}")]
    Fault(String),
}

impl PipelineError {
    /// Whether the ledger should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Authentication(_)
            | Self::MalformedPayload(_)
            | Self::TenantResolution
            | Self::UnknownTenant(_) => false,
            Self::DataSource(e) => e.is_retryable(),
            Self::Timeout { .. } | Self::Ledger(_) | Self::Directory(_) | Self::Fault(_) => true,
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub timestamp: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Application error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Configuration(String),
    Unavailable(String),
    InternalError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::BadRequest(_) => "MALFORMED_PAYLOAD",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Unavailable(_) => "TEMPORARILY_UNAVAILABLE",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Unauthorized(_) => "Signature verification failed".to_string(),
            Self::BadRequest(msg) => msg.clone(),
            Self::NotFound(resource) => format!("{} not found", resource),
            Self::Configuration(msg) => msg.clone(),
            Self::Unavailable(msg) => msg.clone(),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = ApiError::new(self.error_code(), self.message());
        (status, Json(error)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match &err {
            PipelineError::Authentication(reason) => Self::Unauthorized(reason.clone()),
            PipelineError::MalformedPayload(reason) => Self::BadRequest(reason.clone()),
            PipelineError::TenantResolution | PipelineError::UnknownTenant(_) => {
                Self::Configuration(message)
            }
            _ if err.is_retryable() => Self::Unavailable(message),
            _ => Self::InternalError(message),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        Self::InternalError(err.to_string())
    }
}

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, AppError>;
