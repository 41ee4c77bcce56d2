use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::Expr,
};
use tokio::sync::OnceCell;
use tokio::task;

use crate::config::SecurityConfig;
use crate::entities::users;

/// User data returned from repository (without sensitive password hash)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
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

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            name: model.name,
            role: model.role,
            is_admin: model.is_admin,
            notification_email: model.notification_email,
            phone: model.phone,
            two_factor_enabled: model.two_factor_enabled,
            session_timeout_minutes: model.session_timeout_minutes,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Input for creating a user account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: String,
    pub is_admin: bool,
    pub notification_email: Option<String>,
    pub phone: Option<String>,
}

const RECOVERY_CODE_WRITE_ATTEMPTS: usize = 5;

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Get user by email (case-insensitive on the stored lowercase form)
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(normalize_email(email)))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(User::from))
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        let rows = users::Entity::find()
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list users")?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        Ok(self.get_by_email(email).await?.is_some())
    }

    /// Insert a new user, hashing the password with the configured Argon2 params.
    pub async fn create(&self, new_user: NewUser, config: &SecurityConfig) -> Result<User> {
        let password = new_user.password.clone();
        let config = config.clone();
        let password_hash = task::spawn_blocking(move || hash_password(&password, Some(&config)))
            .await
            .context("Password hashing task panicked")??;

        let now = chrono::Utc::now().to_rfc3339();

        let model = users::ActiveModel {
            email: Set(normalize_email(&new_user.email)),
            password_hash: Set(password_hash),
            name: Set(new_user.name),
            role: Set(new_user.role),
            is_admin: Set(new_user.is_admin),
            notification_email: Set(new_user.notification_email),
            phone: Set(new_user.phone),
            two_factor_enabled: Set(false),
            two_factor_recovery_codes: Set(None),
            session_timeout_minutes: Set(None),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert user")?;

        Ok(User::from(model))
    }

    /// Verify email + password and return the user on success.
    ///
    /// An unknown address is still checked against a dummy hash built with
    /// the same Argon2 params, so both misses cost the same time.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        config: &SecurityConfig,
    ) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(normalize_email(email)))
            .one(&self.conn)
            .await
            .context("Failed to query user for password verification")?;

        let Some(user) = user else {
            let dummy = dummy_hash(config).await?;
            verify_hash(dummy, password).await?;
            return Ok(None);
        };

        if verify_hash(user.password_hash.clone(), password).await? {
            Ok(Some(User::from(user)))
        } else {
            Ok(None)
        }
    }

    /// Verify the password of an already identified user
    pub async fn verify_password(&self, user_id: i32, password: &str) -> Result<bool> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for password verification")?;

        match user {
            Some(user) => verify_hash(user.password_hash, password).await,
            None => Ok(false),
        }
    }

    /// Update password for a user with specific security config
    pub async fn update_password(
        &self,
        user_id: i32,
        new_password: &str,
        config: &SecurityConfig,
    ) -> Result<()> {
        let user = self.find_model(user_id).await?;

        let password = new_password.to_string();
        let config = config.clone();
        let new_hash = task::spawn_blocking(move || hash_password(&password, Some(&config)))
            .await
            .context("Password hashing task panicked")??;

        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(new_hash);
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Flip the 2FA flag; recovery codes are replaced (or cleared when disabling).
    pub async fn set_two_factor(
        &self,
        user_id: i32,
        enabled: bool,
        recovery_codes: Option<&[String]>,
    ) -> Result<()> {
        let user = self.find_model(user_id).await?;

        let codes = recovery_codes
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode recovery codes")?;

        let mut active: users::ActiveModel = user.into();
        active.two_factor_enabled = Set(enabled);
        active.two_factor_recovery_codes = Set(codes);
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn get_recovery_codes(&self, user_id: i32) -> Result<Vec<String>> {
        let user = self.find_model(user_id).await?;
        parse_recovery_codes(user.two_factor_recovery_codes.as_deref())
    }

    /// Remove `code` from the user's recovery codes.
    ///
    /// The write is conditional on the column still holding the list that was
    /// read, so a code can only be spent by one caller. A lost race re-reads
    /// the list; a concurrent spend of the same code then finds it gone.
    pub async fn consume_recovery_code(&self, user_id: i32, code: &str) -> Result<bool> {
        for _ in 0..RECOVERY_CODE_WRITE_ATTEMPTS {
            let user = self.find_model(user_id).await?;
            let Some(current) = user.two_factor_recovery_codes else {
                return Ok(false);
            };

            let mut codes = parse_recovery_codes(Some(&current))?;
            let Some(position) = codes.iter().position(|c| c == code) else {
                return Ok(false);
            };
            codes.remove(position);

            let result = users::Entity::update_many()
                .col_expr(
                    users::Column::TwoFactorRecoveryCodes,
                    Expr::value(serde_json::to_string(&codes)?),
                )
                .col_expr(
                    users::Column::UpdatedAt,
                    Expr::value(chrono::Utc::now().to_rfc3339()),
                )
                .filter(users::Column::Id.eq(user_id))
                .filter(users::Column::TwoFactorRecoveryCodes.eq(current))
                .exec(&self.conn)
                .await
                .context("Failed to consume recovery code")?;

            if result.rows_affected == 1 {
                return Ok(true);
            }
        }

        anyhow::bail!("Recovery codes of user {user_id} kept changing during consumption")
    }

    pub async fn update_session_timeout(&self, user_id: i32, minutes: Option<i32>) -> Result<User> {
        let user = self.find_model(user_id).await?;

        let mut active: users::ActiveModel = user.into();
        active.session_timeout_minutes = Set(minutes);
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        let updated = active.update(&self.conn).await?;

        Ok(User::from(updated))
    }

    async fn find_model(&self, user_id: i32) -> Result<users::Model> {
        users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))
    }
}

static DUMMY_HASH: OnceCell<String> = OnceCell::const_new();

/// Hash compared against when the login address does not exist.
async fn dummy_hash(config: &SecurityConfig) -> Result<String> {
    let config = config.clone();
    DUMMY_HASH
        .get_or_try_init(|| async move {
            task::spawn_blocking(move || {
                hash_password(&generate_token(), Some(&config))
            })
            .await
            .context("Password hashing task panicked")?
        })
        .await
        .cloned()
}

fn parse_recovery_codes(raw: Option<&str>) -> Result<Vec<String>> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str::<Option<Vec<String>>>(raw)
            .context("Malformed recovery codes column")?
            .unwrap_or_default()),
        _ => Ok(Vec::new()),
    }
}

async fn verify_hash(password_hash: String, password: &str) -> Result<bool> {
    let password = password.to_string();

    // Run CPU-intensive password verification in a blocking task
    task::spawn_blocking(move || {
        let parsed_hash = PasswordHash::new(&password_hash)
            .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

        Ok::<bool, anyhow::Error>(
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed_hash)
                .is_ok(),
        )
    })
    .await
    .context("Password verification task panicked")?
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hash a password using Argon2id with optional custom params.
/// If config is None, uses the crate's default params.
pub fn hash_password(password: &str, config: Option<&SecurityConfig>) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let argon2 = if let Some(cfg) = config {
        let params = Params::new(
            cfg.argon2_memory_cost_kib,
            cfg.argon2_time_cost,
            cfg.argon2_parallelism,
            None, // output length (use default)
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    } else {
        Argon2::default()
    };

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

/// Generate a random token (64 character hex string)
#[must_use]
pub fn generate_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
