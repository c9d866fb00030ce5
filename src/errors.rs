use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::models::response::DataResult;
use crate::models::validity::ValidityError;
use crate::store::UniqueViolation;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Token is invalid.")]
    TokenNotFound,

    #[error("Token is expired.")]
    TokenExpired,

    #[error("Token is invalid for no policy pass")]
    PolicyRejected,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl From<ValidityError> for AppError {
    fn from(e: ValidityError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    /// Store errors arrive as `anyhow`; uniqueness races become conflicts.
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<UniqueViolation>() {
            Ok(v) => {
                tracing::debug!(constraint = %v, "unique violation");
                AppError::Conflict(
                    "Token with appScenarioName and modelName already exists.".into(),
                )
            }
            Err(e) => AppError::Internal(e),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::TokenNotFound | AppError::TokenExpired | AppError::PolicyRejected => {
                StatusCode::FORBIDDEN
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(DataResult::error(status.as_u16(), msg))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::TokenExpired.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::PolicyRejected.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_unique_violation_becomes_conflict() {
        let err: AppError = anyhow::Error::from(UniqueViolation("dup".into())).into();
        assert!(matches!(err, AppError::Conflict(_)));

        let err: AppError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_validity_error_is_a_bad_request() {
        let err: AppError = ValidityError::TimeOrder.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "startTime must be before endTime.");
    }

    #[tokio::test]
    async fn test_internal_details_are_not_leaked() {
        let resp = AppError::Internal(anyhow::anyhow!("password=hunter2")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("hunter2"));
    }
}
