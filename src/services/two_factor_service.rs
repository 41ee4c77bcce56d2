//! Domain service for e-mailed one-time codes and the per-user 2FA flag.
//!
//! A user is in one of two states, enabled or disabled. Independently of the
//! stored flag, 2FA is *required* for administrators and for holders of the
//! roles listed in `security.two_factor_required_roles`. Required users are
//! always challenged at login and cannot turn 2FA off.

use serde::Serialize;
use thiserror::Error;

use crate::db::User;

#[derive(Debug, Error)]
pub enum TwoFactorError {
    #[error("User not found")]
    UserNotFound,

    #[error("Two-factor authentication is required for this account")]
    Required,

    #[error("Failed to deliver verification code: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for TwoFactorError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for TwoFactorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<crate::services::mailer::MailError> for TwoFactorError {
    fn from(err: crate::services::mailer::MailError) -> Self {
        Self::Delivery(err.to_string())
    }
}

/// What the security settings page shows.
#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub required: bool,
    pub recovery_codes_remaining: usize,
}

#[async_trait::async_trait]
pub trait TwoFactorService: Send + Sync {
    /// Uniformly random 6-digit code, leading zeros kept.
    fn generate_otp_code(&self) -> String;

    /// Store `code` for the user, replacing any pending code.
    async fn store_otp_code(&self, user_id: i32, code: &str) -> Result<(), TwoFactorError>;

    /// Consume the stored code if it matches and has not expired.
    /// A second call with the same code returns `false`.
    async fn verify_otp_code(&self, user_id: i32, code: &str) -> Result<bool, TwoFactorError>;

    async fn send_verification_code(
        &self,
        user_id: i32,
        email: &str,
        code: &str,
    ) -> Result<(), TwoFactorError>;

    /// Generate, store and send a fresh code to the user.
    async fn issue_code(&self, user: &User) -> Result<(), TwoFactorError>;

    async fn enable_two_factor(
        &self,
        user_id: i32,
        recovery_codes: &[String],
    ) -> Result<(), TwoFactorError>;

    /// # Errors
    ///
    /// Returns [`TwoFactorError::Required`] and leaves the flag untouched when
    /// the user must keep 2FA.
    async fn disable_two_factor(&self, user_id: i32) -> Result<(), TwoFactorError>;

    async fn is_two_factor_enabled(&self, user_id: i32) -> Result<bool, TwoFactorError>;

    async fn is_two_factor_required(&self, user_id: i32) -> Result<bool, TwoFactorError>;

    /// Whether login must go through the code challenge.
    async fn needs_challenge(&self, user_id: i32) -> Result<bool, TwoFactorError> {
        Ok(self.is_two_factor_required(user_id).await?
            || self.is_two_factor_enabled(user_id).await?)
    }

    fn generate_recovery_codes(&self) -> Vec<String>;

    /// Consume one recovery code. Returns `false` when it is unknown.
    async fn use_recovery_code(&self, user_id: i32, code: &str) -> Result<bool, TwoFactorError>;

    async fn status(&self, user_id: i32) -> Result<TwoFactorStatus, TwoFactorError>;
}
