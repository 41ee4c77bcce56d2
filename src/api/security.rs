use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, MessageResponse, RecoveryCodesResponse};
use crate::services::{SessionManager, SessionUser, TwoFactorStatus, UserInfo};

#[derive(Deserialize)]
pub struct ConfirmCodeRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct DisableTwoFactorRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct SessionTimeoutRequest {
    pub minutes: u32,
}

/// GET /security/two-factor
pub async fn two_factor_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<ApiResponse<TwoFactorStatus>>, ApiError> {
    let status = state.shared.two_factor_service.status(user.id).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// POST /security/two-factor/enable
/// Sends a code; 2FA is switched on once the code comes back through `verify`.
pub async fn start_enable_two_factor(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let account = state.shared.auth_service.get_user(user.id).await?;
    state.shared.two_factor_service.issue_code(&account).await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "A verification code has been sent",
    ))))
}

/// POST /security/two-factor/verify
pub async fn confirm_enable_two_factor(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Json(payload): Json<ConfirmCodeRequest>,
) -> Result<Json<ApiResponse<RecoveryCodesResponse>>, ApiError> {
    let two_factor = &state.shared.two_factor_service;

    if !two_factor.verify_otp_code(user.id, &payload.code).await? {
        return Err(ApiError::validation("Invalid or expired verification code"));
    }

    let recovery_codes = two_factor.generate_recovery_codes();
    two_factor.enable_two_factor(user.id, &recovery_codes).await?;

    Ok(Json(ApiResponse::success(RecoveryCodesResponse {
        recovery_codes,
    })))
}

/// POST /security/two-factor/disable
pub async fn disable_two_factor(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Json(payload): Json<DisableTwoFactorRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    state
        .shared
        .auth_service
        .confirm_password(user.id, &payload.password)
        .await
        .map_err(|_| ApiError::validation("Password is incorrect"))?;

    state.shared.two_factor_service.disable_two_factor(user.id).await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Two-factor authentication disabled",
    ))))
}

/// POST /settings/security/update-session-timeout
pub async fn update_session_timeout(
    State(state): State<Arc<AppState>>,
    sessions: SessionManager,
    Extension(user): Extension<SessionUser>,
    Json(payload): Json<SessionTimeoutRequest>,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let updated = state
        .shared
        .auth_service
        .update_session_timeout(user.id, payload.minutes)
        .await?;

    sessions.update_user(SessionUser::from(&updated)).await?;
    Ok(Json(ApiResponse::success(updated.into())))
}
