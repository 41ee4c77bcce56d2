use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::db::Store;
use crate::services::{
    AuthService, LogMailer, Mailer, PermissionService, SeaOrmAuthService,
    SeaOrmPermissionService, SeaOrmTwoFactorService, TwoFactorService,
};

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub auth_service: Arc<dyn AuthService>,

    pub permission_service: Arc<dyn PermissionService>,

    pub two_factor_service: Arc<dyn TwoFactorService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let mailer = Arc::new(LogMailer::new(config.mail.from_address.clone())) as Arc<dyn Mailer>;
        Ok(Self::with_store(config, store, mailer))
    }

    /// Wire the services around an already opened store and a chosen mailer.
    #[must_use]
    pub fn with_store(config: Config, store: Store, mailer: Arc<dyn Mailer>) -> Self {
        let two_factor_service = Arc::new(SeaOrmTwoFactorService::new(
            store.clone(),
            mailer.clone(),
            config.security.clone(),
        )) as Arc<dyn TwoFactorService>;

        let permission_service =
            Arc::new(SeaOrmPermissionService::new(store.clone())) as Arc<dyn PermissionService>;

        let config_arc = Arc::new(RwLock::new(config));

        let auth_service = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            two_factor_service.clone(),
            mailer,
            config_arc.clone(),
        )) as Arc<dyn AuthService>;

        Self {
            config: config_arc,
            store,
            auth_service,
            permission_service,
            two_factor_service,
        }
    }
}
