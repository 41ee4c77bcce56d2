//! Domain service for authentication and account security.
//!
//! Handles credential checks, the login outcome (direct or pending a second
//! factor), password change and reset, and user management.

use serde::Serialize;
use thiserror::Error;

use crate::db::User;
use crate::services::two_factor_service::TwoFactorError;

/// Errors specific to authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    TwoFactor(#[from] TwoFactorError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// User info DTO for responses.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub role: String,
    pub is_admin: bool,
    pub notification_email: Option<String>,
    pub phone: Option<String>,
    pub two_factor_enabled: bool,
    pub session_timeout_minutes: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            is_admin: user.is_admin,
            notification_email: user.notification_email,
            phone: user.phone,
            two_factor_enabled: user.two_factor_enabled,
            session_timeout_minutes: user.session_timeout_minutes,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Result of a password check at login.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// No second factor needed; the caller may authenticate the session.
    Authenticated(User),

    /// A code was sent; the session must stay pending until it is verified.
    TwoFactorPending(User),
}

/// Input for creating an account.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    pub password: String,
    pub is_admin: bool,
    pub role_ids: Vec<i32>,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Verifies credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for an unknown email or a
    /// wrong password; the two cases are not distinguished.
    async fn authenticate(&self, email: &str, password: &str) -> Result<User, AuthError>;

    /// Verifies credentials and decides whether a second factor is needed.
    /// In the pending case a fresh code has already been sent.
    async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError>;

    /// Re-checks the password of a logged-in user (sensitive settings changes).
    async fn confirm_password(&self, user_id: i32, password: &str) -> Result<(), AuthError>;

    async fn get_user(&self, user_id: i32) -> Result<User, AuthError>;

    async fn get_user_info(&self, user_id: i32) -> Result<UserInfo, AuthError>;

    /// Changes a user's password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] if current password is incorrect or new password invalid.
    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;

    /// Sends a reset link when the address is known. Succeeds either way.
    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError>;

    async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError>;

    /// Stores the personal inactivity timeout, in minutes.
    async fn update_session_timeout(&self, user_id: i32, minutes: u32)
    -> Result<User, AuthError>;

    async fn create_user(&self, input: CreateUser) -> Result<UserInfo, AuthError>;

    async fn list_users(&self) -> Result<Vec<UserInfo>, AuthError>;
}
