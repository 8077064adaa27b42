use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// A single field-level validation failure, surfaced in 400 responses.
#[derive(Debug, Clone, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub issue: String,
}

impl FieldIssue {
    pub fn new(field: &str, issue: &str) -> Self {
        FieldIssue {
            field: field.to_string(),
            issue: issue.to_string(),
        }
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation failed on {} field(s)", .0.len())]
    FieldValidation(Vec<FieldIssue>),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Analysis usage limit reached")]
    LimitReached,

    #[error("Latest analysis failed; explicit retry required")]
    RetryRequired,

    #[error("Poll rate limit exceeded")]
    PollRateLimited { retry_after_ms: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, extra) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None)
            }
            AppError::FieldValidation(issues) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Request validation failed".to_string(),
                Some(json!({ "issues": issues })),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
                None,
            ),
            AppError::LimitReached => (
                StatusCode::TOO_MANY_REQUESTS,
                "LIMIT_REACHED",
                "Analysis limit reached. Upgrade your plan to run more analyses.".to_string(),
                None,
            ),
            AppError::RetryRequired => (
                StatusCode::CONFLICT,
                "RETRY_REQUIRED",
                "The previous analysis for this document failed. Re-run with retry=true to start a new one."
                    .to_string(),
                None,
            ),
            AppError::PollRateLimited { retry_after_ms } => (
                StatusCode::TOO_MANY_REQUESTS,
                "POLL_RATE_LIMITED",
                "Polling too frequently".to_string(),
                Some(json!({ "retryAfter": retry_after_ms })),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    None,
                )
            }
            AppError::Queue(msg) => {
                tracing::error!("Job queue error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "JOB_QUEUE_NOT_CONFIGURED",
                    "The analysis queue is unavailable".to_string(),
                    None,
                )
            }
            AppError::Llm(msg) => {
                tracing::error!("LLM error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "LLM_ERROR",
                    "An AI processing error occurred".to_string(),
                    None,
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                    None,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    None,
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let (Some(obj), Some(extra)) = (error.as_object_mut(), extra) {
            if let Some(extra) = extra.as_object() {
                for (k, v) in extra {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
