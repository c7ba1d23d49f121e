use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type
///
/// Covers every error class the service distinguishes, from ingress
/// validation down to broker and database failures.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("event already exists")]
    AlreadyExists,

    #[error("event not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("kafka error: {0}")]
    Kafka(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation canceled")]
    Canceled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyExists => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Kafka(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Canceled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-facing message without internal details
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => format!("validation error: {}", msg),
            AppError::AlreadyExists => "event already exists".to_string(),
            AppError::NotFound => "event not found".to_string(),
            AppError::Json(_) => "invalid request body".to_string(),
            AppError::Database(_) => "database error".to_string(),
            AppError::Kafka(_) => "message broker error".to_string(),
            AppError::Canceled => "service shutting down".to_string(),
            AppError::Config(_) | AppError::Internal(_) => "internal error".to_string(),
        }
    }

    fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = %status.as_u16(), "request rejected");
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let body = json!({
            "error": self.user_message(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        AppError::Kafka(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_error_classes() {
        assert_eq!(
            AppError::validation("bad title").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::AlreadyExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Kafka("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn server_errors_hide_details() {
        let err = AppError::Database(sqlx::Error::PoolClosed);
        assert_eq!(err.user_message(), "database error");
    }
}
