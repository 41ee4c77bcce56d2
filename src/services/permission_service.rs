//! Domain service for role-based access control.
//!
//! A user's effective permissions are the direct grants plus the permission
//! sets of every active role assigned to them. Checks are string equality on
//! `module.action` tokens.

use serde::Serialize;
use thiserror::Error;

use crate::db::Role;
use crate::domain::{PermissionName, PermissionNameError, PermissionSet};

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Role not found: {0}")]
    RoleNotFound(i32),

    #[error("User not found: {0}")]
    UserNotFound(i32),

    #[error("Unknown permission: {0}")]
    UnknownPermission(String),

    #[error("Role already exists: {0}")]
    RoleExists(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for PermissionError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for PermissionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<PermissionNameError> for PermissionError {
    fn from(err: PermissionNameError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleDto {
    pub id: i32,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub permissions: Vec<String>,
    pub is_active: bool,
}

impl From<Role> for RoleDto {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            display_name: role.display_name,
            description: role.description,
            permissions: role.permissions.into_vec(),
            is_active: role.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionDto {
    pub name: String,
    pub display_name: String,
    pub module: String,
    pub action: String,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct CreateRole {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub permissions: Vec<String>,
}

#[async_trait::async_trait]
pub trait PermissionService: Send + Sync {
    /// Whether the user holds `permission` directly or through an active role.
    async fn has_permission(&self, user_id: i32, permission: &str)
    -> Result<bool, PermissionError>;

    async fn effective_permissions(&self, user_id: i32) -> Result<PermissionSet, PermissionError>;

    /// Returns `false` when the user already had the role.
    async fn assign_role_to_user(&self, user_id: i32, role_id: i32)
    -> Result<bool, PermissionError>;

    /// Returns `false` when the user did not have the role.
    async fn remove_role_from_user(
        &self,
        user_id: i32,
        role_id: i32,
    ) -> Result<bool, PermissionError>;

    /// Adds a catalog permission to a role.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::Validation`] for a malformed token and
    /// [`PermissionError::UnknownPermission`] when it is not in the catalog.
    async fn assign_permission_to_role(
        &self,
        role_id: i32,
        permission: &str,
    ) -> Result<RoleDto, PermissionError>;

    async fn remove_permission_from_role(
        &self,
        role_id: i32,
        permission: &str,
    ) -> Result<RoleDto, PermissionError>;

    async fn grant_permission_to_user(
        &self,
        user_id: i32,
        permission: &str,
    ) -> Result<bool, PermissionError>;

    async fn revoke_permission_from_user(
        &self,
        user_id: i32,
        permission: &str,
    ) -> Result<bool, PermissionError>;

    async fn list_roles(&self) -> Result<Vec<RoleDto>, PermissionError>;

    async fn create_role(&self, role: CreateRole) -> Result<RoleDto, PermissionError>;

    async fn list_permissions(&self) -> Result<Vec<PermissionDto>, PermissionError>;

    async fn roles_for_user(&self, user_id: i32) -> Result<Vec<RoleDto>, PermissionError>;
}

/// Parse a raw token into a [`PermissionName`].
pub fn parse_permission(raw: &str) -> Result<PermissionName, PermissionError> {
    Ok(raw.parse::<PermissionName>()?)
}
