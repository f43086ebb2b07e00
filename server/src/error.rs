//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tandem_engine::Error as EngineError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// HTTP status for an engine error.
fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::SnapshotNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::ConstraintViolation { .. } => StatusCode::CONFLICT,
        EngineError::Sql { .. }
        | EngineError::TypeMismatch { .. }
        | EngineError::ColumnNotFound(_)
        | EngineError::ClockRegression(_) => StatusCode::BAD_REQUEST,
        EngineError::StoreUnavailable(_) | EngineError::ExportInconsistent(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        EngineError::ReplicaBuildFailed { source } => match engine_status(source) {
            StatusCode::SERVICE_UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        EngineError::ReplicaLoadFailed(_) | EngineError::InvalidExport(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Engine(e) => engine_status(e),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, details) = match &self {
            AppError::Engine(e) if status.is_server_error() => {
                tracing::error!("Engine error: {:?}", e);
                let details = e
                    .needs_fresh_export()
                    .then(|| "a fresh export is required before retrying".to_string());
                (e.to_string(), details)
            }
            AppError::Engine(e) => {
                tracing::warn!("Engine error: {:?}", e);
                (e.to_string(), None)
            }
            AppError::BadRequest(msg) => (msg.clone(), None),
            AppError::Unauthorized(reason) => ("Unauthorized".to_string(), Some(reason.to_string())),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_engine::SnapshotId;

    #[test]
    fn test_engine_status_mapping() {
        let cases = [
            (
                EngineError::SnapshotNotFound(SnapshotId::new()),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::ConstraintViolation {
                    statement: "INSERT".into(),
                    message: "UNIQUE constraint failed".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::Sql {
                    statement: "SELEC".into(),
                    message: "syntax error".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (EngineError::ClockRegression(-1), StatusCode::BAD_REQUEST),
            (
                EngineError::StoreUnavailable("stopped".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EngineError::ReplicaLoadFailed("corrupt".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_build_failure_follows_cause() {
        let unavailable = EngineError::ReplicaBuildFailed {
            source: Box::new(EngineError::StoreUnavailable("stopped".into())),
        };
        assert_eq!(
            AppError::from(unavailable).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let corrupt = EngineError::ReplicaBuildFailed {
            source: Box::new(EngineError::InvalidExport("checksum".into())),
        };
        assert_eq!(
            AppError::from(corrupt).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_into_response_status() {
        let response = AppError::BadRequest("missing sql".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::Unauthorized("Missing authorization header").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
