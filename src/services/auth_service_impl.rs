//! `SeaORM` implementation of the `AuthService` trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::limits::MIN_SESSION_TIMEOUT_MINUTES;
use crate::db::repositories::user::generate_token;
use crate::db::{NewUser, Store, User, is_unique_violation};
use crate::services::auth_service::{AuthError, AuthService, CreateUser, LoginOutcome, UserInfo};
use crate::services::mailer::{MailMessage, Mailer};
use crate::services::two_factor_service::TwoFactorService;

pub struct SeaOrmAuthService {
    store: Store,
    two_factor: Arc<dyn TwoFactorService>,
    mailer: Arc<dyn Mailer>,
    config: Arc<RwLock<Config>>,
}

impl SeaOrmAuthService {
    #[must_use]
    pub fn new(
        store: Store,
        two_factor: Arc<dyn TwoFactorService>,
        mailer: Arc<dyn Mailer>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            store,
            two_factor,
            mailer,
            config,
        }
    }

    async fn validate_new_password(&self, password: &str) -> Result<(), AuthError> {
        let min = self.config.read().await.security.min_password_length;
        if password.chars().count() < min {
            return Err(AuthError::Validation(format!(
                "Password must be at least {min} characters"
            )));
        }
        Ok(())
    }

    /// Housekeeping only; a failure here never fails the caller.
    async fn purge_stale_reset_tokens(&self, now: i64) {
        match self.store.purge_stale_password_reset_tokens(now).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged stale password reset tokens"),
            Err(e) => warn!(error = %e, "Failed to purge password reset tokens"),
        }
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn authenticate(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let security = self.config.read().await.security.clone();
        let user = self
            .store
            .authenticate_user(email, password, &security)
            .await?;

        user.ok_or_else(|| {
            warn!(email = %email.trim(), "Failed login attempt");
            metrics::counter!("auth_logins_total", "result" => "failure").increment(1);
            AuthError::InvalidCredentials
        })
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let user = self.authenticate(email, password).await?;

        if self.two_factor.needs_challenge(user.id).await? {
            self.two_factor.issue_code(&user).await?;
            metrics::counter!("auth_logins_total", "result" => "two_factor_pending").increment(1);
            info!(user_id = user.id, "Password accepted, awaiting second factor");
            return Ok(LoginOutcome::TwoFactorPending(user));
        }

        metrics::counter!("auth_logins_total", "result" => "success").increment(1);
        info!(user_id = user.id, "User logged in");
        Ok(LoginOutcome::Authenticated(user))
    }

    async fn confirm_password(&self, user_id: i32, password: &str) -> Result<(), AuthError> {
        if self.store.verify_user_password(user_id, password).await? {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    async fn get_user(&self, user_id: i32) -> Result<User, AuthError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn get_user_info(&self, user_id: i32) -> Result<UserInfo, AuthError> {
        Ok(self.get_user(user_id).await?.into())
    }

    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.validate_new_password(new_password).await?;

        if current_password == new_password {
            return Err(AuthError::Validation(
                "New password must be different from current password".to_string(),
            ));
        }

        let is_valid = self
            .store
            .verify_user_password(user_id, current_password)
            .await?;

        if !is_valid {
            return Err(AuthError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }

        let security = self.config.read().await.security.clone();
        self.store
            .update_user_password(user_id, new_password, &security)
            .await?;

        info!(user_id, "Password changed");
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let Some(user) = self.store.get_user_by_email(email).await? else {
            info!("Password reset requested for unknown address");
            return Ok(());
        };

        let (ttl_minutes, app_url) = {
            let config = self.config.read().await;
            (
                config.security.password_reset_ttl_minutes,
                config.mail.app_url.clone(),
            )
        };

        let now = chrono::Utc::now().timestamp();
        self.purge_stale_reset_tokens(now).await;

        let token = generate_token();
        let expires_at = now + i64::from(ttl_minutes) * 60;
        self.store
            .create_password_reset_token(user.id, &token, expires_at)
            .await?;

        let message = MailMessage {
            to: user.email.clone(),
            subject: "Reset your TerrainTrack password".to_string(),
            body: format!(
                "Open {}/reset-password?token={token} within {ttl_minutes} minutes to choose a new password.",
                app_url.trim_end_matches('/')
            ),
        };

        // Delivery problems must not reveal whether the address exists.
        if let Err(e) = self.mailer.send(message).await {
            warn!(user_id = user.id, error = %e, "Failed to send password reset mail");
        }

        Ok(())
    }

    async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        self.validate_new_password(new_password).await?;

        let now = chrono::Utc::now().timestamp();
        let user_id = self
            .store
            .consume_password_reset_token(token.trim(), now)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let security = self.config.read().await.security.clone();
        self.store
            .update_user_password(user_id, new_password, &security)
            .await?;
        self.store.invalidate_password_reset_tokens(user_id).await?;
        self.purge_stale_reset_tokens(now).await;

        info!(user_id, "Password reset completed");
        Ok(())
    }

    async fn update_session_timeout(
        &self,
        user_id: i32,
        minutes: u32,
    ) -> Result<User, AuthError> {
        let max = self.config.read().await.security.max_session_timeout_minutes;
        if !(MIN_SESSION_TIMEOUT_MINUTES..=max).contains(&minutes) {
            return Err(AuthError::Validation(format!(
                "Session timeout must be between {MIN_SESSION_TIMEOUT_MINUTES} and {max} minutes"
            )));
        }

        let minutes = i32::try_from(minutes)
            .map_err(|_| AuthError::Validation("Session timeout out of range".to_string()))?;

        self.get_user(user_id).await?;
        let user = self
            .store
            .update_user_session_timeout(user_id, Some(minutes))
            .await?;

        info!(user_id, minutes, "Session timeout updated");
        Ok(user)
    }

    async fn create_user(&self, input: CreateUser) -> Result<UserInfo, AuthError> {
        self.validate_new_password(&input.password).await?;

        if self.store.user_email_exists(&input.email).await? {
            return Err(AuthError::EmailTaken);
        }

        let mut roles = Vec::with_capacity(input.role_ids.len());
        for role_id in &input.role_ids {
            let role = self
                .store
                .get_role(*role_id)
                .await?
                .ok_or_else(|| AuthError::Validation(format!("Unknown role: {role_id}")))?;
            roles.push(role);
        }

        let display_role = roles
            .first()
            .map_or_else(|| "user".to_string(), |r| r.name.clone());

        let security = self.config.read().await.security.clone();
        let user = self
            .store
            .create_user(
                NewUser {
                    email: input.email,
                    name: input.name,
                    password: input.password,
                    role: display_role,
                    is_admin: input.is_admin,
                    notification_email: None,
                    phone: None,
                },
                &security,
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AuthError::EmailTaken
                } else {
                    AuthError::from(e)
                }
            })?;

        for role in &roles {
            self.store.assign_role_to_user(user.id, role.id).await?;
        }

        info!(user_id = user.id, roles = roles.len(), "User created");
        Ok(user.into())
    }

    async fn list_users(&self) -> Result<Vec<UserInfo>, AuthError> {
        let users = self.store.list_users().await?;
        Ok(users.into_iter().map(UserInfo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::db::test_support::test_store;
    use crate::services::mailer::test_support::RecordingMailer;
    use crate::services::two_factor_service_impl::SeaOrmTwoFactorService;

    struct Harness {
        store: Store,
        mailer: Arc<RecordingMailer>,
        service: SeaOrmAuthService,
    }

    async fn setup() -> Harness {
        let store = test_store().await;
        let mailer = Arc::new(RecordingMailer::default());
        let two_factor = Arc::new(SeaOrmTwoFactorService::new(
            store.clone(),
            mailer.clone(),
            SecurityConfig::default(),
        ));
        let service = SeaOrmAuthService::new(
            store.clone(),
            two_factor,
            mailer.clone(),
            Arc::new(RwLock::new(Config::default())),
        );
        Harness {
            store,
            mailer,
            service,
        }
    }

    async fn create_plain_user(h: &Harness, email: &str) -> UserInfo {
        h.service
            .create_user(CreateUser {
                email: email.to_string(),
                name: "Plain".to_string(),
                password: "password123".to_string(),
                is_admin: false,
                role_ids: vec![],
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_without_two_factor_is_authenticated() {
        let h = setup().await;
        create_plain_user(&h, "Plain@Example.com").await;

        let outcome = h
            .service
            .login("plain@example.com", "password123")
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
        assert!(h.mailer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_admin_login_is_pending_and_sends_code() {
        let h = setup().await;

        let outcome = h
            .service
            .login(
                crate::constants::bootstrap::ADMIN_EMAIL,
                crate::constants::bootstrap::ADMIN_PASSWORD,
            )
            .await
            .unwrap();

        let LoginOutcome::TwoFactorPending(user) = outcome else {
            panic!("admin login must require a second factor");
        };
        assert!(h.store.get_otp_code(user.id).await.unwrap().is_some());
        assert_eq!(h.mailer.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_email_look_the_same() {
        let h = setup().await;
        create_plain_user(&h, "who@example.com").await;

        assert!(matches!(
            h.service.login("who@example.com", "nope-nope").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            h.service.login("ghost@example.com", "password123").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_change_password_rules() {
        let h = setup().await;
        let user = create_plain_user(&h, "change@example.com").await;

        assert!(matches!(
            h.service.change_password(user.id, "password123", "short").await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            h.service
                .change_password(user.id, "password123", "password123")
                .await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            h.service
                .change_password(user.id, "wrong-current", "newpassword1")
                .await,
            Err(AuthError::Validation(_))
        ));

        h.service
            .change_password(user.id, "password123", "newpassword1")
            .await
            .unwrap();
        assert!(h.service.authenticate("change@example.com", "newpassword1").await.is_ok());
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let h = setup().await;
        create_plain_user(&h, "reset@example.com").await;

        h.service
            .request_password_reset("nobody@example.com")
            .await
            .unwrap();
        assert!(h.mailer.sent.lock().await.is_empty());

        h.service
            .request_password_reset("reset@example.com")
            .await
            .unwrap();
        let body = h.mailer.sent.lock().await[0].body.clone();
        let token = body
            .split("token=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap()
            .to_string();
        assert_eq!(token.len(), 64);

        h.service.reset_password(&token, "brandnewpass").await.unwrap();
        assert!(h.service.authenticate("reset@example.com", "brandnewpass").await.is_ok());

        assert!(matches!(
            h.service.reset_password(&token, "anotherpass1").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_stale_reset_tokens_are_purged() {
        use crate::entities::prelude::PasswordResetTokens;
        use sea_orm::EntityTrait;

        let h = setup().await;
        let user = create_plain_user(&h, "stale@example.com").await;
        let now = chrono::Utc::now().timestamp();

        h.store
            .create_password_reset_token(user.id, "expired-token", now - 60)
            .await
            .unwrap();
        h.store
            .create_password_reset_token(user.id, "spent-token", now + 600)
            .await
            .unwrap();
        h.store
            .consume_password_reset_token("spent-token", now)
            .await
            .unwrap();

        h.service
            .request_password_reset("stale@example.com")
            .await
            .unwrap();

        let rows = PasswordResetTokens::find().all(&h.store.conn).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].used);
        assert_ne!(rows[0].token, "expired-token");

        let fresh = rows[0].token.clone();
        h.service.reset_password(&fresh, "brandnewpass").await.unwrap();
        let rows = PasswordResetTokens::find().all(&h.store.conn).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_session_timeout_bounds() {
        let h = setup().await;
        let user = create_plain_user(&h, "timeout@example.com").await;

        assert!(h.service.update_session_timeout(user.id, 4).await.is_err());
        assert!(h.service.update_session_timeout(user.id, 1441).await.is_err());

        let updated = h.service.update_session_timeout(user.id, 90).await.unwrap();
        assert_eq!(updated.session_timeout_minutes, Some(90));
    }

    #[tokio::test]
    async fn test_create_user_rejects_duplicate_email() {
        let h = setup().await;
        let viewer = h.store.get_role_by_name("viewer").await.unwrap().unwrap();

        let created = h
            .service
            .create_user(CreateUser {
                email: "dup@example.com".to_string(),
                name: "Dup".to_string(),
                password: "password123".to_string(),
                is_admin: false,
                role_ids: vec![viewer.id],
            })
            .await
            .unwrap();
        assert_eq!(created.role, "viewer");
        assert_eq!(h.store.get_roles_for_user(created.id).await.unwrap().len(), 1);

        assert!(matches!(
            h.service
                .create_user(CreateUser {
                    email: "DUP@example.com".to_string(),
                    name: "Dup".to_string(),
                    password: "password123".to_string(),
                    is_admin: false,
                    role_ids: vec![],
                })
                .await,
            Err(AuthError::EmailTaken)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_signups_for_one_email() {
        let h = setup().await;
        let signup = || {
            h.service.create_user(CreateUser {
                email: "race@example.com".to_string(),
                name: "Race".to_string(),
                password: "password123".to_string(),
                is_admin: false,
                role_ids: vec![],
            })
        };

        let (first, second) = tokio::join!(signup(), signup());
        let taken = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Err(AuthError::EmailTaken)))
            .count();
        assert_eq!(taken, 1);
        assert!(first.is_ok() || second.is_ok());
    }
}
