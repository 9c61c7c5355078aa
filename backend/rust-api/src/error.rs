use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy shared by every handler. Services return `anyhow::Result`
/// and embed an `ApiError` where the failure is a client-facing condition;
/// `ApiError::from_service` recovers it at the handler boundary and treats
/// everything else as a 500.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    /// Recover a typed error raised inside a service call; anything else is
    /// an unexpected failure.
    pub fn from_service(err: anyhow::Error) -> Self {
        match err.downcast::<ApiError>() {
            Ok(api_err) => api_err,
            Err(other) => ApiError::Internal(other),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(err) => {
                tracing::error!("Unhandled error: {:#}", err);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_service_recovers_typed_errors() {
        let err: anyhow::Error = ApiError::conflict("Exam already completed").into();
        let recovered = ApiError::from_service(err);
        assert!(matches!(recovered, ApiError::Conflict(_)));
        assert_eq!(recovered.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn from_service_recovers_through_context() {
        use anyhow::Context;

        let err: anyhow::Error = ApiError::not_found("Attempt not found").into();
        let wrapped = Err::<(), _>(err)
            .context("while loading the attempt")
            .unwrap_err();
        let recovered = ApiError::from_service(wrapped);
        assert!(matches!(recovered, ApiError::NotFound(_)));
    }

    #[test]
    fn unexpected_errors_map_to_internal() {
        let err = anyhow::anyhow!("connection reset");
        let recovered = ApiError::from_service(err);
        assert_eq!(recovered.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
