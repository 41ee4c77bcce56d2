//! `SeaORM` implementation of the `TwoFactorService` trait.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::SecurityConfig;
use crate::constants::two_factor::{OTP_DIGITS, RECOVERY_CODE_COUNT};
use crate::db::{Store, User};
use crate::services::mailer::{MailMessage, Mailer};
use crate::services::two_factor_service::{TwoFactorError, TwoFactorService, TwoFactorStatus};

const RECOVERY_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";
const RECOVERY_HALF_LEN: usize = 5;

pub struct SeaOrmTwoFactorService {
    store: Store,
    mailer: Arc<dyn Mailer>,
    security: SecurityConfig,
}

impl SeaOrmTwoFactorService {
    #[must_use]
    pub fn new(store: Store, mailer: Arc<dyn Mailer>, security: SecurityConfig) -> Self {
        Self {
            store,
            mailer,
            security,
        }
    }

    fn otp_ttl_secs(&self) -> i64 {
        i64::from(self.security.otp_ttl_minutes) * 60
    }

    async fn load_user(&self, user_id: i32) -> Result<User, TwoFactorError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(TwoFactorError::UserNotFound)
    }
}

fn recovery_half(rng: &mut impl Rng) -> String {
    (0..RECOVERY_HALF_LEN)
        .map(|_| char::from(RECOVERY_ALPHABET[rng.random_range(0..RECOVERY_ALPHABET.len())]))
        .collect()
}

#[async_trait]
impl TwoFactorService for SeaOrmTwoFactorService {
    fn generate_otp_code(&self) -> String {
        let upper = 10u32.pow(OTP_DIGITS);
        let n = rand::rng().random_range(0..upper);
        format!("{n:0width$}", width = OTP_DIGITS as usize)
    }

    async fn store_otp_code(&self, user_id: i32, code: &str) -> Result<(), TwoFactorError> {
        let expires_at = chrono::Utc::now().timestamp() + self.otp_ttl_secs();
        self.store.store_otp_code(user_id, code, expires_at).await?;
        Ok(())
    }

    async fn verify_otp_code(&self, user_id: i32, code: &str) -> Result<bool, TwoFactorError> {
        let now = chrono::Utc::now().timestamp();
        let code = code.trim();

        let valid = !code.is_empty() && self.store.consume_otp_code(user_id, code, now).await?;

        let purged = self.store.purge_expired_otp_codes(now).await?;
        if purged > 0 {
            debug!(purged, "Purged expired OTP codes");
        }

        metrics::counter!(
            "auth_otp_verifications_total",
            "result" => if valid { "success" } else { "failure" }
        )
        .increment(1);

        if !valid {
            warn!(user_id, "OTP verification failed");
        }
        Ok(valid)
    }

    async fn send_verification_code(
        &self,
        user_id: i32,
        email: &str,
        code: &str,
    ) -> Result<(), TwoFactorError> {
        let message = MailMessage {
            to: email.to_string(),
            subject: "Your TerrainTrack verification code".to_string(),
            body: format!(
                "Your verification code is {code}. It expires in {} minutes.",
                self.security.otp_ttl_minutes
            ),
        };

        self.mailer.send(message).await?;
        debug!(user_id, "Verification code sent");
        Ok(())
    }

    async fn issue_code(&self, user: &User) -> Result<(), TwoFactorError> {
        let code = self.generate_otp_code();
        self.store_otp_code(user.id, &code).await?;

        let recipient = user
            .notification_email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(&user.email);
        self.send_verification_code(user.id, recipient, &code).await
    }

    async fn enable_two_factor(
        &self,
        user_id: i32,
        recovery_codes: &[String],
    ) -> Result<(), TwoFactorError> {
        self.load_user(user_id).await?;
        self.store
            .set_user_two_factor(user_id, true, Some(recovery_codes))
            .await?;
        info!(user_id, "Two-factor authentication enabled");
        Ok(())
    }

    async fn disable_two_factor(&self, user_id: i32) -> Result<(), TwoFactorError> {
        if self.is_two_factor_required(user_id).await? {
            warn!(user_id, "Refused to disable required two-factor authentication");
            return Err(TwoFactorError::Required);
        }

        self.store.set_user_two_factor(user_id, false, None).await?;
        self.store.delete_otp_code(user_id).await?;
        info!(user_id, "Two-factor authentication disabled");
        Ok(())
    }

    async fn is_two_factor_enabled(&self, user_id: i32) -> Result<bool, TwoFactorError> {
        Ok(self.load_user(user_id).await?.two_factor_enabled)
    }

    async fn is_two_factor_required(&self, user_id: i32) -> Result<bool, TwoFactorError> {
        let user = self.load_user(user_id).await?;
        if user.is_admin {
            return Ok(true);
        }

        let roles = self.store.get_roles_for_user(user_id).await?;
        Ok(roles.iter().any(|role| {
            role.is_active
                && self
                    .security
                    .two_factor_required_roles
                    .iter()
                    .any(|required| required == &role.name)
        }))
    }

    fn generate_recovery_codes(&self) -> Vec<String> {
        let mut rng = rand::rng();
        (0..RECOVERY_CODE_COUNT)
            .map(|_| format!("{}-{}", recovery_half(&mut rng), recovery_half(&mut rng)))
            .collect()
    }

    async fn use_recovery_code(&self, user_id: i32, code: &str) -> Result<bool, TwoFactorError> {
        let wanted = code.trim().to_lowercase();
        if wanted.is_empty() || !self.store.consume_user_recovery_code(user_id, &wanted).await? {
            warn!(user_id, "Unknown recovery code");
            return Ok(false);
        }

        let remaining = self.store.get_user_recovery_codes(user_id).await?.len();
        info!(user_id, remaining, "Recovery code used");
        Ok(true)
    }

    async fn status(&self, user_id: i32) -> Result<TwoFactorStatus, TwoFactorError> {
        let enabled = self.is_two_factor_enabled(user_id).await?;
        let required = self.is_two_factor_required(user_id).await?;
        let recovery_codes_remaining = self.store.get_user_recovery_codes(user_id).await?.len();

        Ok(TwoFactorStatus {
            enabled,
            required,
            recovery_codes_remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewUser;
    use crate::db::test_support::test_store;
    use crate::services::mailer::test_support::RecordingMailer;

    async fn setup() -> (Store, Arc<RecordingMailer>, SeaOrmTwoFactorService) {
        let store = test_store().await;
        let mailer = Arc::new(RecordingMailer::default());
        let service =
            SeaOrmTwoFactorService::new(store.clone(), mailer.clone(), SecurityConfig::default());
        (store, mailer, service)
    }

    async fn create_user(store: &Store, email: &str) -> User {
        store
            .create_user(
                NewUser {
                    email: email.to_string(),
                    name: "Driver".to_string(),
                    password: "password123".to_string(),
                    role: "viewer".to_string(),
                    is_admin: false,
                    notification_email: None,
                    phone: None,
                },
                &SecurityConfig::default(),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_generate_otp_code_format() {
        let service = SeaOrmTwoFactorService {
            store: Store {
                conn: sea_orm::DatabaseConnection::Disconnected,
            },
            mailer: Arc::new(RecordingMailer::default()),
            security: SecurityConfig::default(),
        };

        for _ in 0..200 {
            let code = service.generate_otp_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }

        let codes = service.generate_recovery_codes();
        assert_eq!(codes.len(), 8);
        for code in &codes {
            let (left, right) = code.split_once('-').unwrap();
            assert_eq!(left.len(), 5);
            assert_eq!(right.len(), 5);
        }
    }

    #[tokio::test]
    async fn test_issued_code_verifies_exactly_once() {
        let (store, mailer, service) = setup().await;
        let user = create_user(&store, "driver@example.com").await;

        service.issue_code(&user).await.unwrap();

        let code = store.get_otp_code(user.id).await.unwrap().unwrap().code;
        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "driver@example.com");
        assert!(sent[0].body.contains(&code));
        drop(sent);

        assert!(!service.verify_otp_code(user.id, "not-it").await.unwrap());
        assert!(service.verify_otp_code(user.id, &code).await.unwrap());
        assert!(!service.verify_otp_code(user.id, &code).await.unwrap());
    }

    #[tokio::test]
    async fn test_code_rejected_after_window() {
        let (store, _mailer, service) = setup().await;
        let user = create_user(&store, "late@example.com").await;

        let issued_at = chrono::Utc::now().timestamp() - 11 * 60;
        store
            .store_otp_code(user.id, "123456", issued_at + 10 * 60)
            .await
            .unwrap();

        assert!(!service.verify_otp_code(user.id, "123456").await.unwrap());
        assert!(store.get_otp_code(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_code_replaces_pending_one() {
        let (store, _mailer, service) = setup().await;
        let user = create_user(&store, "twice@example.com").await;

        service.store_otp_code(user.id, "111111").await.unwrap();
        service.store_otp_code(user.id, "222222").await.unwrap();

        assert!(!service.verify_otp_code(user.id, "111111").await.unwrap());
        assert!(service.verify_otp_code(user.id, "222222").await.unwrap());
    }

    #[tokio::test]
    async fn test_required_rule_for_admins_and_roles() {
        let (store, _mailer, service) = setup().await;

        let admin = store
            .get_user_by_email(crate::constants::bootstrap::ADMIN_EMAIL)
            .await
            .unwrap()
            .unwrap();
        assert!(service.is_two_factor_required(admin.id).await.unwrap());
        assert!(service.needs_challenge(admin.id).await.unwrap());

        let user = create_user(&store, "plain@example.com").await;
        assert!(!service.is_two_factor_required(user.id).await.unwrap());
        assert!(!service.needs_challenge(user.id).await.unwrap());

        let admin_role = store.get_role_by_name("admin").await.unwrap().unwrap();
        store.assign_role_to_user(user.id, admin_role.id).await.unwrap();
        assert!(service.is_two_factor_required(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_disable_refused_when_required() {
        let (store, _mailer, service) = setup().await;
        let admin = store
            .get_user_by_email(crate::constants::bootstrap::ADMIN_EMAIL)
            .await
            .unwrap()
            .unwrap();

        let codes = service.generate_recovery_codes();
        service.enable_two_factor(admin.id, &codes).await.unwrap();

        assert!(matches!(
            service.disable_two_factor(admin.id).await,
            Err(TwoFactorError::Required)
        ));
        assert!(service.is_two_factor_enabled(admin.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_enable_disable_for_optional_user() {
        let (store, _mailer, service) = setup().await;
        let user = create_user(&store, "opt@example.com").await;

        let codes = service.generate_recovery_codes();
        service.enable_two_factor(user.id, &codes).await.unwrap();
        assert!(service.is_two_factor_enabled(user.id).await.unwrap());
        assert!(service.needs_challenge(user.id).await.unwrap());

        service.disable_two_factor(user.id).await.unwrap();
        assert!(!service.is_two_factor_enabled(user.id).await.unwrap());
        assert_eq!(service.status(user.id).await.unwrap().recovery_codes_remaining, 0);
    }

    #[tokio::test]
    async fn test_recovery_code_is_single_use() {
        let (store, _mailer, service) = setup().await;
        let user = create_user(&store, "recover@example.com").await;

        let codes = service.generate_recovery_codes();
        service.enable_two_factor(user.id, &codes).await.unwrap();

        assert!(service.use_recovery_code(user.id, &codes[3]).await.unwrap());
        assert!(!service.use_recovery_code(user.id, &codes[3]).await.unwrap());
        assert!(!service.use_recovery_code(user.id, "zzzzz-zzzzz").await.unwrap());

        let status = service.status(user.id).await.unwrap();
        assert_eq!(status.recovery_codes_remaining, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_recovery_code_is_accepted_once() {
        let (store, _mailer, service) = setup().await;
        let service = Arc::new(service);
        let user = create_user(&store, "race@example.com").await;

        let codes = service.generate_recovery_codes();
        service.enable_two_factor(user.id, &codes).await.unwrap();

        for (round, code) in codes.iter().enumerate() {
            let tasks: Vec<_> = (0..2)
                .map(|_| {
                    let service = service.clone();
                    let code = code.clone();
                    tokio::spawn(async move { service.use_recovery_code(user.id, &code).await })
                })
                .collect();

            let mut accepted = 0;
            for task in tasks {
                if task.await.unwrap().unwrap() {
                    accepted += 1;
                }
            }
            assert_eq!(accepted, 1, "code {round} was accepted {accepted} times");

            let remaining = store.get_user_recovery_codes(user.id).await.unwrap();
            assert_eq!(remaining.len(), codes.len() - round - 1);
        }
    }
}
