use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::services::{AuthError, PermissionError, SessionError, TwoFactorError};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    DatabaseError(String),

    ExternalServiceError { service: String, message: String },

    ValidationError(String),

    Conflict(String),

    InternalError(String),

    Unauthorized(String),

    Forbidden(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ApiError::ExternalServiceError { service, message } => {
                write!(f, "{} error: {}", service, message)
            }
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            ApiError::ExternalServiceError { service, message } => {
                tracing::warn!("{} error: {}", service, message);
                (
                    StatusCode::BAD_GATEWAY,
                    format!("{} service is unavailable", service),
                )
            }
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => ApiError::Unauthorized(err.to_string()),
            AuthError::UserNotFound => ApiError::NotFound(err.to_string()),
            AuthError::EmailTaken => ApiError::Conflict(err.to_string()),
            AuthError::InvalidToken => ApiError::ValidationError(err.to_string()),
            AuthError::Validation(msg) => ApiError::ValidationError(msg),
            AuthError::TwoFactor(inner) => inner.into(),
            AuthError::Database(msg) => ApiError::DatabaseError(msg),
            AuthError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<TwoFactorError> for ApiError {
    fn from(err: TwoFactorError) -> Self {
        match err {
            TwoFactorError::UserNotFound => ApiError::NotFound(err.to_string()),
            TwoFactorError::Required => ApiError::Conflict(err.to_string()),
            TwoFactorError::Delivery(message) => ApiError::ExternalServiceError {
                service: "Mail".to_string(),
                message,
            },
            TwoFactorError::Database(msg) => ApiError::DatabaseError(msg),
            TwoFactorError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<PermissionError> for ApiError {
    fn from(err: PermissionError) -> Self {
        match err {
            PermissionError::RoleNotFound(_) | PermissionError::UserNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            PermissionError::UnknownPermission(_) => ApiError::ValidationError(err.to_string()),
            PermissionError::Validation(msg) => ApiError::ValidationError(msg),
            PermissionError::RoleExists(_) => ApiError::Conflict(err.to_string()),
            PermissionError::Database(msg) => ApiError::DatabaseError(msg),
            PermissionError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotAuthenticated | SessionError::Expired => {
                ApiError::Unauthorized(err.to_string())
            }
            SessionError::Store(msg) => ApiError::InternalError(format!("Session error: {msg}")),
        }
    }
}

impl ApiError {
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        ApiError::NotFound(format!("{} {} not found", resource, id))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::InternalError(msg.into())
    }

    pub fn forbidden(permission: &str) -> Self {
        ApiError::Forbidden(format!("Missing permission: {permission}"))
    }
}
