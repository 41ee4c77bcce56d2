//! Request-scoped session handling.
//!
//! [`SessionManager`] wraps the `tower_sessions::Session` of one request and
//! owns every key the application keeps server-side: the authenticated user
//! snapshot, the pending two-factor snapshot, the inactivity clock and the
//! CSRF token. The backing store is whatever `SessionManagerLayer` was built
//! with (memory or `SQLite`).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_sessions::Session;
use tracing::{debug, warn};

use crate::constants::session_keys;
use crate::db::User;
use crate::db::repositories::user::generate_token;

/// Copy of the user kept in the session, so guards do not hit the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
    pub session_timeout_minutes: Option<i32>,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            is_admin: user.is_admin,
            session_timeout_minutes: user.session_timeout_minutes,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired")]
    Expired,

    #[error("Session store error: {0}")]
    Store(String),
}

impl From<tower_sessions::session::Error> for SessionError {
    fn from(err: tower_sessions::session::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[derive(Clone)]
pub struct SessionManager {
    session: Session,
    default_timeout_minutes: u32,
}

impl SessionManager {
    #[must_use]
    pub const fn new(session: Session, default_timeout_minutes: u32) -> Self {
        Self {
            session,
            default_timeout_minutes,
        }
    }

    /// Make sure the session carries a CSRF token and return it.
    /// Calling it again returns the same token.
    pub async fn start_session(&self) -> Result<String, SessionError> {
        if let Some(token) = self.csrf_token().await {
            return Ok(token);
        }

        let token = generate_token();
        self.session
            .insert(session_keys::CSRF_TOKEN, &token)
            .await?;
        Ok(token)
    }

    pub async fn csrf_token(&self) -> Option<String> {
        self.session
            .get::<String>(session_keys::CSRF_TOKEN)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read CSRF token from session");
                None
            })
    }

    /// Promote the session to authenticated for `user`.
    ///
    /// The session id is cycled and a fresh CSRF token is issued, which is
    /// returned to the caller.
    pub async fn login(&self, user: SessionUser) -> Result<String, SessionError> {
        self.session.cycle_id().await?;
        self.clear_pending_two_factor().await?;

        let csrf = generate_token();
        self.session.insert(session_keys::USER, &user).await?;
        self.session.insert(session_keys::AUTHENTICATED, true).await?;
        self.session
            .insert(session_keys::LAST_ACTIVITY, now())
            .await?;
        self.session.insert(session_keys::CSRF_TOKEN, &csrf).await?;

        debug!(user_id = user.id, "Session authenticated");
        Ok(csrf)
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        self.session.flush().await?;
        Ok(())
    }

    /// Park `user` as waiting for a second factor. The session is explicitly
    /// not authenticated while in this state.
    pub async fn set_pending_two_factor(&self, user: SessionUser) -> Result<(), SessionError> {
        self.session.remove::<SessionUser>(session_keys::USER).await?;
        self.session
            .insert(session_keys::AUTHENTICATED, false)
            .await?;
        self.session
            .insert(session_keys::PENDING_2FA_USER, &user)
            .await?;
        self.session
            .insert(session_keys::PENDING_2FA_FAILURES, 0u32)
            .await?;
        self.start_session().await?;
        Ok(())
    }

    pub async fn pending_two_factor_user(&self) -> Option<SessionUser> {
        self.session
            .get::<SessionUser>(session_keys::PENDING_2FA_USER)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read pending 2FA user from session");
                None
            })
    }

    pub async fn clear_pending_two_factor(&self) -> Result<(), SessionError> {
        self.session
            .remove::<SessionUser>(session_keys::PENDING_2FA_USER)
            .await?;
        self.session
            .remove::<u32>(session_keys::PENDING_2FA_FAILURES)
            .await?;
        Ok(())
    }

    /// Count one wrong second-factor code and return the running total.
    pub async fn record_failed_two_factor_attempt(&self) -> Result<u32, SessionError> {
        let failures = self
            .session
            .get::<u32>(session_keys::PENDING_2FA_FAILURES)
            .await?
            .unwrap_or(0)
            .saturating_add(1);
        self.session
            .insert(session_keys::PENDING_2FA_FAILURES, failures)
            .await?;
        Ok(failures)
    }

    /// Session-cached snapshot; never re-read from the database.
    pub async fn current_user(&self) -> Option<SessionUser> {
        if !self.is_authenticated().await {
            return None;
        }

        self.session
            .get::<SessionUser>(session_keys::USER)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read user from session");
                None
            })
    }

    pub async fn is_authenticated(&self) -> bool {
        match self.session.get::<bool>(session_keys::AUTHENTICATED).await {
            Ok(flag) => flag.unwrap_or(false),
            Err(e) => {
                warn!(error = %e, "Failed to read session state");
                false
            }
        }
    }

    pub async fn require_login(&self) -> Result<SessionUser, SessionError> {
        self.require_login_at(now()).await
    }

    /// Same as [`Self::require_login`] with an explicit clock (unix seconds).
    pub async fn require_login_at(&self, now: i64) -> Result<SessionUser, SessionError> {
        let Some(user) = self.current_user().await else {
            return Err(SessionError::NotAuthenticated);
        };

        let last_activity = self
            .session
            .get::<i64>(session_keys::LAST_ACTIVITY)
            .await
            .ok()
            .flatten()
            .unwrap_or(now);

        let timeout_secs = i64::from(self.timeout_minutes_for(&user)) * 60;
        if now - last_activity > timeout_secs {
            debug!(user_id = user.id, idle_secs = now - last_activity, "Session expired");
            self.session.flush().await?;
            return Err(SessionError::Expired);
        }

        self.session
            .insert(session_keys::LAST_ACTIVITY, now)
            .await?;
        Ok(user)
    }

    /// Replace the stored snapshot after the user changed their settings.
    pub async fn update_user(&self, user: SessionUser) -> Result<(), SessionError> {
        if !self.is_authenticated().await {
            return Err(SessionError::NotAuthenticated);
        }
        self.session.insert(session_keys::USER, &user).await?;
        Ok(())
    }

    fn timeout_minutes_for(&self, user: &SessionUser) -> u32 {
        user.session_timeout_minutes
            .and_then(|m| u32::try_from(m).ok())
            .filter(|m| *m > 0)
            .unwrap_or(self.default_timeout_minutes)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
