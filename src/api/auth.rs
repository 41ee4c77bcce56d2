use axum::{
    Extension, Json,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_sessions::Session;
use tracing::{info, warn};

use super::validation::{validate_email, validate_password_confirmation};
use super::{
    ApiError, ApiResponse, AppState, LoginResponse, LoginStatus, MeResponse, MessageResponse,
};
use crate::constants::CSRF_HEADER;
use crate::constants::two_factor::MAX_FAILED_ATTEMPTS;
use crate::services::{LoginOutcome, SessionError, SessionManager, SessionUser};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct VerifyTwoFactorRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub recovery_code: Option<String>,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}

// ============================================================================
// Extractor
// ============================================================================

impl FromRequestParts<Arc<AppState>> for SessionManager {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| ApiError::internal(msg))?;
        let timeout = state.config().read().await.security.session_timeout_minutes;

        Ok(Self::new(session, timeout))
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Login-required guard for every protected route.
///
/// On success the session snapshot is made available to handlers as an
/// `Extension<SessionUser>`. Unsafe methods must echo the session's CSRF token
/// in the `X-CSRF-Token` header.
pub async fn require_login(
    sessions: SessionManager,
    mut request: Request,
    next: Next,
) -> Response {
    let wants_html = accepts_html(request.headers());

    let user = match sessions.require_login().await {
        Ok(user) => user,
        Err(SessionError::NotAuthenticated) => return unauthenticated(wants_html, false),
        Err(SessionError::Expired) => return unauthenticated(wants_html, true),
        Err(e) => return ApiError::from(e).into_response(),
    };

    tracing::Span::current().record("user_id", user.id);

    if !request.method().is_safe()
        && let Err(e) = check_csrf(&sessions, request.headers()).await
    {
        warn!(user_id = user.id, method = %request.method(), "CSRF token mismatch");
        return e.into_response();
    }

    request.extensions_mut().insert(user);
    next.run(request).await
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

fn unauthenticated(wants_html: bool, expired: bool) -> Response {
    match (wants_html, expired) {
        (true, true) => Redirect::to("/login?expired=1").into_response(),
        (true, false) => Redirect::to("/login").into_response(),
        (false, true) => ApiError::from(SessionError::Expired).into_response(),
        (false, false) => ApiError::from(SessionError::NotAuthenticated).into_response(),
    }
}

/// Compare the `X-CSRF-Token` header against the token held by the session.
pub async fn check_csrf(sessions: &SessionManager, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());

    match (sessions.csrf_token().await, provided) {
        (Some(expected), Some(provided)) if expected == provided => Ok(()),
        _ => Err(ApiError::Forbidden("Invalid CSRF token".to_string())),
    }
}

async fn require_pending(sessions: &SessionManager) -> Result<SessionUser, ApiError> {
    sessions
        .pending_two_factor_user()
        .await
        .ok_or_else(|| ApiError::Unauthorized("No pending two-factor verification".to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/login
/// Check the password; either authenticates the session or parks it pending a code.
pub async fn login(
    State(state): State<Arc<AppState>>,
    sessions: SessionManager,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let email = validate_email(&payload.email)?;
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let outcome = state.shared.auth_service.login(&email, &payload.password).await?;

    let response = match outcome {
        LoginOutcome::Authenticated(user) => {
            let csrf_token = sessions.login(SessionUser::from(&user)).await?;
            LoginResponse {
                status: LoginStatus::Authenticated,
                user: Some(user.into()),
                csrf_token,
            }
        }
        LoginOutcome::TwoFactorPending(user) => {
            sessions.set_pending_two_factor(SessionUser::from(&user)).await?;
            LoginResponse {
                status: LoginStatus::TwoFactorRequired,
                user: None,
                csrf_token: sessions.start_session().await?,
            }
        }
    };

    Ok(Json(ApiResponse::success(response)))
}

/// POST /auth/logout
pub async fn logout(sessions: SessionManager) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    sessions.logout().await?;
    Ok(Json(ApiResponse::success(MessageResponse::new("Logged out"))))
}

/// POST /auth/verify-2fa
/// Accepts either the emailed code or one recovery code.
pub async fn verify_two_factor(
    State(state): State<Arc<AppState>>,
    sessions: SessionManager,
    headers: HeaderMap,
    Json(payload): Json<VerifyTwoFactorRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let pending = require_pending(&sessions).await?;
    check_csrf(&sessions, &headers).await?;

    let two_factor = &state.shared.two_factor_service;
    let verified = match (payload.code.as_deref(), payload.recovery_code.as_deref()) {
        (Some(code), _) if !code.trim().is_empty() => {
            two_factor.verify_otp_code(pending.id, code).await?
        }
        (_, Some(recovery)) if !recovery.trim().is_empty() => {
            two_factor.use_recovery_code(pending.id, recovery).await?
        }
        _ => return Err(ApiError::validation("A verification code is required")),
    };

    if !verified {
        let failures = sessions.record_failed_two_factor_attempt().await?;
        if failures >= MAX_FAILED_ATTEMPTS {
            sessions.clear_pending_two_factor().await?;
            warn!(user_id = pending.id, failures, "Too many wrong codes, pending login dropped");
            return Err(ApiError::Unauthorized(
                "Too many failed attempts, please log in again".to_string(),
            ));
        }
        return Err(ApiError::Unauthorized(
            "Invalid or expired verification code".to_string(),
        ));
    }

    let user = state.shared.auth_service.get_user(pending.id).await?;
    let csrf_token = sessions.login(SessionUser::from(&user)).await?;
    info!(user_id = user.id, "Second factor verified");

    Ok(Json(ApiResponse::success(LoginResponse {
        status: LoginStatus::Authenticated,
        user: Some(user.into()),
        csrf_token,
    })))
}

/// POST /auth/resend-2fa-code
pub async fn resend_two_factor_code(
    State(state): State<Arc<AppState>>,
    sessions: SessionManager,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let pending = require_pending(&sessions).await?;
    check_csrf(&sessions, &headers).await?;

    let user = state.shared.auth_service.get_user(pending.id).await?;
    state.shared.two_factor_service.issue_code(&user).await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "A new verification code has been sent",
    ))))
}

/// POST /auth/password-reset/request
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let email = validate_email(&payload.email)?;
    state.shared.auth_service.request_password_reset(&email).await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "If the address is registered, a reset link has been sent",
    ))))
}

/// POST /auth/password-reset/confirm
pub async fn confirm_password_reset(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PasswordResetConfirm>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    validate_password_confirmation(&payload.new_password, &payload.confirm_password)?;
    state
        .shared
        .auth_service
        .reset_password(&payload.token, &payload.new_password)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Password has been reset",
    ))))
}

/// GET /auth/me
pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    sessions: SessionManager,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<ApiResponse<MeResponse>>, ApiError> {
    let info = state.shared.auth_service.get_user_info(user.id).await?;
    let roles = state.shared.permission_service.roles_for_user(user.id).await?;
    let permissions = state
        .shared
        .permission_service
        .effective_permissions(user.id)
        .await?
        .into_vec();
    let two_factor_required = state
        .shared
        .two_factor_service
        .is_two_factor_required(user.id)
        .await?;

    Ok(Json(ApiResponse::success(MeResponse {
        user: info,
        roles,
        permissions,
        two_factor_required,
        csrf_token: sessions.csrf_token().await,
    })))
}

/// PUT /auth/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    validate_password_confirmation(&payload.new_password, &payload.confirm_password)?;

    state
        .shared
        .auth_service
        .change_password(user.id, &payload.current_password, &payload.new_password)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Password updated successfully",
    ))))
}
