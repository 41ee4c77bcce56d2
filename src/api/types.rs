use serde::{Deserialize, Serialize};

use crate::db::Vehicle;
use crate::services::{RoleDto, UserInfo};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    Authenticated,
    TwoFactorRequired,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: LoginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    pub csrf_token: String,
}

/// The logged-in user with everything the UI needs to hide or show actions.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserInfo,
    pub roles: Vec<RoleDto>,
    pub permissions: Vec<String>,
    pub two_factor_required: bool,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserPermissionsResponse {
    pub user_id: i32,
    pub roles: Vec<RoleDto>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangedResponse {
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct RecoveryCodesResponse {
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VehicleDto {
    pub id: i32,
    pub registration: String,
    pub brand: String,
    pub model: String,
    pub year: Option<i32>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Vehicle> for VehicleDto {
    fn from(vehicle: Vehicle) -> Self {
        Self {
            id: vehicle.id,
            registration: vehicle.registration,
            brand: vehicle.brand,
            model: vehicle.model_name,
            year: vehicle.year,
            status: vehicle.status,
            created_at: vehicle.created_at,
            updated_at: vehicle.updated_at,
        }
    }
}
