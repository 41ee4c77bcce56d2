use axum::{
    Json, Router,
    extract::State,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{
    Expiry, MemoryStore, SessionManagerLayer, SessionStore, cookie::SameSite,
    session_store::ExpiredDeletion,
};
use tower_sessions_sqlx_store::SqliteStore;

use crate::config::{Config, SessionStoreKind};
use crate::constants::{CSRF_HEADER, SESSION_CLEANUP_INTERVAL_SECS};
use crate::state::SharedState;

mod admin;
pub mod auth;
pub mod authz;
mod error;
mod observability;
mod security;
mod types;
mod validation;
mod vehicles;

pub use error::ApiError;
pub use types::*;

use tokio::sync::RwLock;

use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }
}

#[must_use]
pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared, prometheus_handle))
}

/// Build the HTTP application, including the session layer for the
/// configured store.
pub async fn router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let (cors_origins, secure_cookies, store_kind, max_timeout) = {
        let config = state.config().read().await;
        (
            config.server.cors_allowed_origins.clone(),
            config.server.secure_cookies,
            config.server.session_store,
            config.security.max_session_timeout_minutes,
        )
    };

    let expiry = Expiry::OnInactivity(time::Duration::minutes(i64::from(max_timeout)));

    let api = match store_kind {
        SessionStoreKind::Memory => {
            let layer = SessionManagerLayer::new(MemoryStore::default())
                .with_secure(secure_cookies)
                .with_same_site(SameSite::Lax)
                .with_expiry(expiry);
            api_router(state.clone(), layer)
        }
        SessionStoreKind::Sqlite => {
            let pool = state.store().conn.get_sqlite_connection_pool().clone();
            let store = SqliteStore::new(pool);
            store.migrate().await?;

            let cleanup = store.clone();
            tokio::spawn(async move {
                if let Err(e) = cleanup
                    .continuously_delete_expired(tokio::time::Duration::from_secs(
                        SESSION_CLEANUP_INTERVAL_SECS,
                    ))
                    .await
                {
                    tracing::error!(error = %e, "Expired session cleanup stopped");
                }
            });

            let layer = SessionManagerLayer::new(store)
                .with_secure(secure_cookies)
                .with_same_site(SameSite::Lax)
                .with_expiry(expiry);
            api_router(state.clone(), layer)
        }
    };

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        // Credentialed CORS cannot use wildcards.
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([
                header::CONTENT_TYPE,
                header::ACCEPT,
                HeaderName::from_static(CSRF_HEADER),
            ])
            .allow_credentials(true)
    };

    Ok(Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn(observability::security_headers_middleware))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http()))
}

fn api_router<S>(state: Arc<AppState>, session_layer: SessionManagerLayer<S>) -> Router
where
    S: SessionStore + Clone,
{
    let protected_routes = create_protected_router(state.clone());

    Router::new()
        .merge(protected_routes)
        .route("/health", get(health))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/verify-2fa", post(auth::verify_two_factor))
        .route("/auth/resend-2fa-code", post(auth::resend_two_factor_code))
        .route(
            "/auth/password-reset/request",
            post(auth::request_password_reset),
        )
        .route(
            "/auth/password-reset/confirm",
            post(auth::confirm_password_reset),
        )
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(session_layer)
        .with_state(state)
}

fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(auth::get_current_user))
        .route("/auth/password", put(auth::change_password))
        .route("/security/two-factor", get(security::two_factor_status))
        .route(
            "/security/two-factor/enable",
            post(security::start_enable_two_factor),
        )
        .route(
            "/security/two-factor/verify",
            post(security::confirm_enable_two_factor),
        )
        .route(
            "/security/two-factor/disable",
            post(security::disable_two_factor),
        )
        .route(
            "/settings/security/update-session-timeout",
            post(security::update_session_timeout),
        )
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users", post(admin::create_user))
        .route(
            "/admin/users/{id}/permissions",
            get(admin::get_user_permissions),
        )
        .route(
            "/admin/users/{id}/permissions",
            post(admin::grant_user_permission),
        )
        .route(
            "/admin/users/{id}/permissions/{name}",
            delete(admin::revoke_user_permission),
        )
        .route("/admin/users/{id}/roles", post(admin::assign_user_role))
        .route(
            "/admin/users/{id}/roles/{role_id}",
            delete(admin::remove_user_role),
        )
        .route("/admin/roles", get(admin::list_roles))
        .route("/admin/roles", post(admin::create_role))
        .route(
            "/admin/roles/{id}/permissions",
            post(admin::add_role_permission),
        )
        .route(
            "/admin/roles/{id}/permissions/{name}",
            delete(admin::remove_role_permission),
        )
        .route("/admin/permissions", get(admin::list_permissions))
        .route("/vehicles", get(vehicles::list_vehicles))
        .route("/vehicles", post(vehicles::create_vehicle))
        .route("/vehicles/{id}", get(vehicles::get_vehicle))
        .route("/vehicles/{id}", put(vehicles::update_vehicle))
        .route("/vehicles/{id}", delete(vehicles::delete_vehicle))
        .route("/metrics", get(observability::get_metrics))
        .route_layer(middleware::from_fn_with_state(state, auth::require_login))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub uptime_seconds: u64,
    pub version: &'static str,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthResponse>> {
    let database = match state.store().ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            false
        }
    };

    Json(ApiResponse::success(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}
