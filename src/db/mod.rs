use crate::config::SecurityConfig;
use crate::domain::PermissionSet;
use crate::entities::permissions;
use anyhow::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, SqlErr, Statement,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::otp::OtpCode;
pub use repositories::role::{NewRole, Role};
pub use repositories::user::{NewUser, User};
pub use repositories::vehicle::{Vehicle, VehicleInput};

/// True when the insert or update lost a race against a unique index,
/// e.g. two requests registering the same email at once.
#[must_use]
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<DbErr>().and_then(DbErr::sql_err),
        Some(SqlErr::UniqueConstraintViolation(_))
    )
}

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn role_repo(&self) -> repositories::role::RoleRepository {
        repositories::role::RoleRepository::new(self.conn.clone())
    }

    fn permission_repo(&self) -> repositories::permission::PermissionRepository {
        repositories::permission::PermissionRepository::new(self.conn.clone())
    }

    fn otp_repo(&self) -> repositories::otp::OtpRepository {
        repositories::otp::OtpRepository::new(self.conn.clone())
    }

    fn password_reset_repo(&self) -> repositories::password_reset::PasswordResetRepository {
        repositories::password_reset::PasswordResetRepository::new(self.conn.clone())
    }

    fn vehicle_repo(&self) -> repositories::vehicle::VehicleRepository {
        repositories::vehicle::VehicleRepository::new(self.conn.clone())
    }

    // ========== User Repository Methods ==========

    pub async fn get_user(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().get_by_id(id).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.user_repo().get_by_email(email).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.user_repo().list().await
    }

    pub async fn user_email_exists(&self, email: &str) -> Result<bool> {
        self.user_repo().email_exists(email).await
    }

    pub async fn create_user(&self, user: NewUser, config: &SecurityConfig) -> Result<User> {
        self.user_repo().create(user, config).await
    }

    pub async fn authenticate_user(
        &self,
        email: &str,
        password: &str,
        config: &SecurityConfig,
    ) -> Result<Option<User>> {
        self.user_repo().authenticate(email, password, config).await
    }

    pub async fn verify_user_password(&self, user_id: i32, password: &str) -> Result<bool> {
        self.user_repo().verify_password(user_id, password).await
    }

    pub async fn update_user_password(
        &self,
        user_id: i32,
        new_password: &str,
        config: &SecurityConfig,
    ) -> Result<()> {
        self.user_repo()
            .update_password(user_id, new_password, config)
            .await
    }

    pub async fn set_user_two_factor(
        &self,
        user_id: i32,
        enabled: bool,
        recovery_codes: Option<&[String]>,
    ) -> Result<()> {
        self.user_repo()
            .set_two_factor(user_id, enabled, recovery_codes)
            .await
    }

    pub async fn get_user_recovery_codes(&self, user_id: i32) -> Result<Vec<String>> {
        self.user_repo().get_recovery_codes(user_id).await
    }

    pub async fn consume_user_recovery_code(&self, user_id: i32, code: &str) -> Result<bool> {
        self.user_repo().consume_recovery_code(user_id, code).await
    }

    pub async fn update_user_session_timeout(
        &self,
        user_id: i32,
        minutes: Option<i32>,
    ) -> Result<User> {
        self.user_repo()
            .update_session_timeout(user_id, minutes)
            .await
    }

    // ========== Role Repository Methods ==========

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.role_repo().list().await
    }

    pub async fn get_role(&self, id: i32) -> Result<Option<Role>> {
        self.role_repo().get(id).await
    }

    pub async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        self.role_repo().get_by_name(name).await
    }

    pub async fn create_role(&self, role: NewRole) -> Result<Role> {
        self.role_repo().create(role).await
    }

    pub async fn update_role_permissions(&self, id: i32, permissions: &PermissionSet) -> Result<()> {
        self.role_repo().update_permissions(id, permissions).await
    }

    pub async fn get_roles_for_user(&self, user_id: i32) -> Result<Vec<Role>> {
        self.role_repo().for_user(user_id).await
    }

    pub async fn assign_role_to_user(&self, user_id: i32, role_id: i32) -> Result<bool> {
        self.role_repo().assign_to_user(user_id, role_id).await
    }

    pub async fn remove_role_from_user(&self, user_id: i32, role_id: i32) -> Result<bool> {
        self.role_repo().remove_from_user(user_id, role_id).await
    }

    // ========== Permission Repository Methods ==========

    pub async fn list_permissions(&self) -> Result<Vec<permissions::Model>> {
        self.permission_repo().list().await
    }

    pub async fn is_permission_active(&self, name: &str) -> Result<bool> {
        self.permission_repo().is_active(name).await
    }

    pub async fn get_direct_permissions(&self, user_id: i32) -> Result<Vec<String>> {
        self.permission_repo().direct_for_user(user_id).await
    }

    pub async fn user_has_direct_permission(&self, user_id: i32, name: &str) -> Result<bool> {
        self.permission_repo().user_has_direct(user_id, name).await
    }

    pub async fn grant_user_permission(&self, user_id: i32, name: &str) -> Result<bool> {
        self.permission_repo().grant_to_user(user_id, name).await
    }

    pub async fn revoke_user_permission(&self, user_id: i32, name: &str) -> Result<bool> {
        self.permission_repo().revoke_from_user(user_id, name).await
    }

    // ========== OTP Repository Methods ==========

    pub async fn store_otp_code(&self, user_id: i32, code: &str, expires_at: i64) -> Result<()> {
        self.otp_repo().upsert(user_id, code, expires_at).await
    }

    pub async fn get_otp_code(&self, user_id: i32) -> Result<Option<OtpCode>> {
        self.otp_repo().get(user_id).await
    }

    pub async fn consume_otp_code(&self, user_id: i32, code: &str, now: i64) -> Result<bool> {
        self.otp_repo().consume(user_id, code, now).await
    }

    pub async fn purge_expired_otp_codes(&self, now: i64) -> Result<u64> {
        self.otp_repo().delete_expired(now).await
    }

    pub async fn delete_otp_code(&self, user_id: i32) -> Result<()> {
        self.otp_repo().delete_for_user(user_id).await
    }

    // ========== Password Reset Repository Methods ==========

    pub async fn create_password_reset_token(
        &self,
        user_id: i32,
        token: &str,
        expires_at: i64,
    ) -> Result<()> {
        self.password_reset_repo()
            .create(user_id, token, expires_at)
            .await
    }

    pub async fn consume_password_reset_token(&self, token: &str, now: i64) -> Result<Option<i32>> {
        self.password_reset_repo().consume(token, now).await
    }

    pub async fn invalidate_password_reset_tokens(&self, user_id: i32) -> Result<u64> {
        self.password_reset_repo()
            .invalidate_for_user(user_id)
            .await
    }

    pub async fn purge_stale_password_reset_tokens(&self, now: i64) -> Result<u64> {
        self.password_reset_repo().delete_stale(now).await
    }

    // ========== Vehicle Repository Methods ==========

    pub async fn list_vehicles(&self) -> Result<Vec<Vehicle>> {
        self.vehicle_repo().list().await
    }

    pub async fn get_vehicle(&self, id: i32) -> Result<Option<Vehicle>> {
        self.vehicle_repo().get(id).await
    }

    pub async fn get_vehicle_by_registration(&self, registration: &str) -> Result<Option<Vehicle>> {
        self.vehicle_repo().get_by_registration(registration).await
    }

    pub async fn create_vehicle(&self, input: VehicleInput) -> Result<Vehicle> {
        self.vehicle_repo().create(input).await
    }

    pub async fn update_vehicle(&self, id: i32, input: VehicleInput) -> Result<Option<Vehicle>> {
        self.vehicle_repo().update(id, input).await
    }

    pub async fn delete_vehicle(&self, id: i32) -> Result<bool> {
        self.vehicle_repo().delete(id).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_store;
    use super::{NewUser, VehicleInput, is_unique_violation};
    use crate::config::SecurityConfig;

    fn vehicle(registration: &str) -> VehicleInput {
        VehicleInput {
            registration: registration.to_string(),
            brand: "Toyota".to_string(),
            model_name: "Land Cruiser".to_string(),
            year: Some(2021),
            status: "available".to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_a_unique_violation() {
        let store = test_store().await;

        let first = store.create_vehicle(vehicle("TT-200")).await.unwrap();
        let err = store.create_vehicle(vehicle("TT-200")).await.unwrap_err();
        assert!(is_unique_violation(&err));

        let other = store.create_vehicle(vehicle("TT-201")).await.unwrap();
        let err = store
            .update_vehicle(other.id, vehicle("TT-200"))
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(store.delete_vehicle(first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_a_unique_violation() {
        let store = test_store().await;
        let new_user = || NewUser {
            email: "Dup@TerrainTrack.local".to_string(),
            name: "Dup".to_string(),
            password: "field-notes-2024".to_string(),
            role: "viewer".to_string(),
            is_admin: false,
            notification_email: None,
            phone: None,
        };
        let config = SecurityConfig::default();

        store.create_user(new_user(), &config).await.unwrap();
        let err = store.create_user(new_user(), &config).await.unwrap_err();
        assert!(is_unique_violation(&err));

        let other = anyhow::anyhow!("not a database error");
        assert!(!is_unique_violation(&other));
    }

    #[tokio::test]
    async fn test_migrations_seed_bootstrap_admin() {
        let store = test_store().await;

        let admin = store
            .get_user_by_email(crate::constants::bootstrap::ADMIN_EMAIL)
            .await
            .unwrap()
            .expect("bootstrap admin missing");
        assert!(admin.is_admin);

        let roles = store.get_roles_for_user(admin.id).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "super_admin");
        assert!(roles[0].permissions.contains("roles.manage"));

        let catalog = store.list_permissions().await.unwrap();
        assert!(catalog.iter().any(|p| p.name == "vehicles.view"));
        assert!(catalog.iter().all(|p| p.name == format!("{}.{}", p.module, p.action)));
    }

    #[tokio::test]
    async fn test_assign_role_is_idempotent() {
        let store = test_store().await;
        let admin = store
            .get_user_by_email(crate::constants::bootstrap::ADMIN_EMAIL)
            .await
            .unwrap()
            .unwrap();
        let viewer = store.get_role_by_name("viewer").await.unwrap().unwrap();

        assert!(store.assign_role_to_user(admin.id, viewer.id).await.unwrap());
        assert!(!store.assign_role_to_user(admin.id, viewer.id).await.unwrap());
        assert_eq!(store.get_roles_for_user(admin.id).await.unwrap().len(), 2);

        assert!(store.remove_role_from_user(admin.id, viewer.id).await.unwrap());
        assert!(!store.remove_role_from_user(admin.id, viewer.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_otp_code_is_consumed_once_and_replaced_on_upsert() {
        let store = test_store().await;
        let now = chrono::Utc::now().timestamp();

        store.store_otp_code(1, "111111", now + 600).await.unwrap();
        store.store_otp_code(1, "222222", now + 600).await.unwrap();

        assert!(!store.consume_otp_code(1, "111111", now).await.unwrap());
        assert!(store.consume_otp_code(1, "222222", now).await.unwrap());
        assert!(!store.consume_otp_code(1, "222222", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_otp_code_rejected_after_expiry() {
        let store = test_store().await;
        let now = chrono::Utc::now().timestamp();

        store.store_otp_code(1, "333333", now - 1).await.unwrap();
        assert!(!store.consume_otp_code(1, "333333", now).await.unwrap());
        assert_eq!(store.purge_expired_otp_codes(now).await.unwrap(), 1);
        assert!(store.get_otp_code(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_password_reset_token_single_use() {
        let store = test_store().await;
        let now = chrono::Utc::now().timestamp();

        store
            .create_password_reset_token(1, "tok-valid", now + 3600)
            .await
            .unwrap();
        store
            .create_password_reset_token(1, "tok-expired", now - 10)
            .await
            .unwrap();

        assert_eq!(
            store.consume_password_reset_token("tok-valid", now).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            store.consume_password_reset_token("tok-valid", now).await.unwrap(),
            None
        );
        assert_eq!(
            store
                .consume_password_reset_token("tok-expired", now)
                .await
                .unwrap(),
            None
        );
    }
}
