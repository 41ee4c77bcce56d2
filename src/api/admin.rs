use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::authz::require_permission;
use super::validation::{validate_email, validate_id, validate_name};
use super::{ApiError, ApiResponse, AppState, ChangedResponse, UserPermissionsResponse};
use crate::services::{CreateRole, CreateUser, PermissionDto, RoleDto, SessionUser, UserInfo};

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub role_ids: Vec<i32>,
}

#[derive(Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: i32,
}

#[derive(Deserialize)]
pub struct PermissionRequest {
    pub permission: String,
}

#[derive(Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<ApiResponse<Vec<UserInfo>>>, ApiError> {
    require_permission(&state, &user, "users.view").await?;
    let users = state.shared.auth_service.list_users().await?;
    Ok(Json(ApiResponse::success(users)))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    require_permission(&state, &user, "users.create").await?;

    // Only administrators may mint administrators.
    if payload.is_admin && !user.is_admin {
        return Err(ApiError::Forbidden(
            "Only administrators can create administrator accounts".to_string(),
        ));
    }

    let email = validate_email(&payload.email)?;
    let name = validate_name(&payload.name)?.to_string();
    for role_id in &payload.role_ids {
        validate_id(*role_id, "role")?;
    }

    let created = state
        .shared
        .auth_service
        .create_user(CreateUser {
            email,
            name,
            password: payload.password,
            is_admin: payload.is_admin,
            role_ids: payload.role_ids,
        })
        .await?;

    Ok(Json(ApiResponse::success(created)))
}

pub async fn get_user_permissions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<UserPermissionsResponse>>, ApiError> {
    require_permission(&state, &user, "users.view").await?;
    let id = validate_id(id, "user")?;

    state.shared.auth_service.get_user(id).await?;
    let permissions = &state.shared.permission_service;

    Ok(Json(ApiResponse::success(UserPermissionsResponse {
        user_id: id,
        roles: permissions.roles_for_user(id).await?,
        permissions: permissions.effective_permissions(id).await?.into_vec(),
    })))
}

pub async fn assign_user_role(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i32>,
    Json(payload): Json<AssignRoleRequest>,
) -> Result<Json<ApiResponse<ChangedResponse>>, ApiError> {
    require_permission(&state, &user, "roles.manage").await?;
    let id = validate_id(id, "user")?;
    let role_id = validate_id(payload.role_id, "role")?;

    let changed = state
        .shared
        .permission_service
        .assign_role_to_user(id, role_id)
        .await?;
    Ok(Json(ApiResponse::success(ChangedResponse { changed })))
}

pub async fn remove_user_role(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path((id, role_id)): Path<(i32, i32)>,
) -> Result<Json<ApiResponse<ChangedResponse>>, ApiError> {
    require_permission(&state, &user, "roles.manage").await?;

    let changed = state
        .shared
        .permission_service
        .remove_role_from_user(validate_id(id, "user")?, validate_id(role_id, "role")?)
        .await?;
    Ok(Json(ApiResponse::success(ChangedResponse { changed })))
}

pub async fn grant_user_permission(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i32>,
    Json(payload): Json<PermissionRequest>,
) -> Result<Json<ApiResponse<ChangedResponse>>, ApiError> {
    require_permission(&state, &user, "roles.manage").await?;

    let changed = state
        .shared
        .permission_service
        .grant_permission_to_user(validate_id(id, "user")?, &payload.permission)
        .await?;
    Ok(Json(ApiResponse::success(ChangedResponse { changed })))
}

pub async fn revoke_user_permission(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path((id, name)): Path<(i32, String)>,
) -> Result<Json<ApiResponse<ChangedResponse>>, ApiError> {
    require_permission(&state, &user, "roles.manage").await?;

    let changed = state
        .shared
        .permission_service
        .revoke_permission_from_user(validate_id(id, "user")?, &name)
        .await?;
    Ok(Json(ApiResponse::success(ChangedResponse { changed })))
}

// ---------------------------------------------------------------------------
// Roles and catalog
// ---------------------------------------------------------------------------

pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<ApiResponse<Vec<RoleDto>>>, ApiError> {
    require_permission(&state, &user, "roles.view").await?;
    let roles = state.shared.permission_service.list_roles().await?;
    Ok(Json(ApiResponse::success(roles)))
}

pub async fn create_role(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Json(payload): Json<CreateRoleRequest>,
) -> Result<Json<ApiResponse<RoleDto>>, ApiError> {
    require_permission(&state, &user, "roles.manage").await?;

    let role = state
        .shared
        .permission_service
        .create_role(CreateRole {
            name: payload.name,
            display_name: payload.display_name,
            description: payload.description,
            permissions: payload.permissions,
        })
        .await?;
    Ok(Json(ApiResponse::success(role)))
}

pub async fn add_role_permission(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i32>,
    Json(payload): Json<PermissionRequest>,
) -> Result<Json<ApiResponse<RoleDto>>, ApiError> {
    require_permission(&state, &user, "roles.manage").await?;

    let role = state
        .shared
        .permission_service
        .assign_permission_to_role(validate_id(id, "role")?, &payload.permission)
        .await?;
    Ok(Json(ApiResponse::success(role)))
}

pub async fn remove_role_permission(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path((id, name)): Path<(i32, String)>,
) -> Result<Json<ApiResponse<RoleDto>>, ApiError> {
    require_permission(&state, &user, "roles.manage").await?;

    let role = state
        .shared
        .permission_service
        .remove_permission_from_role(validate_id(id, "role")?, &name)
        .await?;
    Ok(Json(ApiResponse::success(role)))
}

pub async fn list_permissions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<ApiResponse<Vec<PermissionDto>>>, ApiError> {
    require_permission(&state, &user, "roles.view").await?;
    let catalog = state.shared.permission_service.list_permissions().await?;
    Ok(Json(ApiResponse::success(catalog)))
}
