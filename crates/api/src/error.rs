use atelier_core::error::CoreError;
use atelier_pipeline::{MigrationError, PipelineError, StoreError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and the pipeline errors, and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `atelier_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A job creation, query or reconciliation failure.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A resource addressed by something other than its id was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Pipeline(PipelineError::Store(err))
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    internal()
                }
            },

            // --- Pipeline errors ---
            AppError::Pipeline(err) => match err {
                PipelineError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                PipelineError::InsufficientCredits { .. } => (
                    StatusCode::PAYMENT_REQUIRED,
                    "INSUFFICIENT_CREDITS",
                    err.to_string(),
                ),
                PipelineError::ProviderCall { job_id, source } => {
                    tracing::warn!(%job_id, error = %source, "Provider did not accept task");
                    (
                        StatusCode::BAD_GATEWAY,
                        "PROVIDER_ERROR",
                        "The generation provider rejected the request. No credits were charged."
                            .to_string(),
                    )
                }
                PipelineError::PostAcceptanceBookkeeping { .. } => {
                    tracing::error!(error = %err, "Post-acceptance bookkeeping failed");
                    internal()
                }
                PipelineError::NotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Generation job with id {id} not found"),
                ),
                PipelineError::Forbidden(msg) => {
                    (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone())
                }
                PipelineError::Store(StoreError::Database(db)) => classify_sqlx_error(db),
                PipelineError::Store(other) => {
                    tracing::error!(error = %other, "Store error");
                    internal()
                }
            },

            // --- Migration scheduler ---
            AppError::Migration(MigrationError::AlreadyRunning) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                "A migration sweep is already running".to_string(),
            ),
            AppError::Migration(MigrationError::Store(StoreError::Database(db))) => {
                classify_sqlx_error(db)
            }
            AppError::Migration(MigrationError::Store(other)) => {
                tracing::error!(error = %other, "Store error");
                internal()
            }

            // --- Database errors ---
            AppError::Database(err) => classify_sqlx_error(err),

            // --- HTTP-specific errors ---
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
            }
            tracing::error!(error = %db_err, "Database error");
            internal()
        }
        other => {
            tracing::error!(error = %other, "Database error");
            internal()
        }
    }
}

#[cfg(test)]
mod tests {
    use atelier_core::types::new_id;
    use atelier_providers::ProviderError;

    use super::*;

    fn status_of(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn pipeline_errors_map_to_statuses() {
        assert_eq!(
            status_of(PipelineError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(PipelineError::InsufficientCredits {
                required: 4,
                available: 3
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(PipelineError::ProviderCall {
                job_id: new_id(),
                source: ProviderError::Malformed("nope".into()),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(PipelineError::PostAcceptanceBookkeeping {
                job_id: new_id(),
                remote_task_id: "task-1".into(),
                message: "lost connection".into(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(PipelineError::NotFound(new_id())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(StoreError::Unavailable("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn concurrent_sweep_is_a_conflict() {
        assert_eq!(status_of(MigrationError::AlreadyRunning), StatusCode::CONFLICT);
    }

    #[test]
    fn row_not_found_is_404() {
        assert_eq!(status_of(sqlx::Error::RowNotFound), StatusCode::NOT_FOUND);
    }
}
