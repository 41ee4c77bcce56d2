use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::authz::require_permission;
use super::validation::{
    validate_id, validate_name, validate_registration, validate_vehicle_status,
    validate_vehicle_year,
};
use super::{ApiError, ApiResponse, AppState, MessageResponse, VehicleDto};
use crate::db::{VehicleInput, is_unique_violation};
use crate::services::SessionUser;

fn default_status() -> String {
    "available".to_string()
}

#[derive(Deserialize)]
pub struct VehicleRequest {
    pub registration: String,
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default = "default_status")]
    pub status: String,
}

impl VehicleRequest {
    fn into_input(self) -> Result<VehicleInput, ApiError> {
        Ok(VehicleInput {
            registration: validate_registration(&self.registration)?,
            brand: validate_name(&self.brand)?.to_string(),
            model_name: validate_name(&self.model)?.to_string(),
            year: validate_vehicle_year(self.year)?,
            status: validate_vehicle_status(&self.status)?.to_string(),
        })
    }
}

/// Registration must stay unique; `exclude` is the vehicle being edited.
async fn ensure_registration_free(
    state: &AppState,
    registration: &str,
    exclude: Option<i32>,
) -> Result<(), ApiError> {
    match state.store().get_vehicle_by_registration(registration).await? {
        Some(existing) if Some(existing.id) != exclude => Err(ApiError::Conflict(format!(
            "Vehicle {registration} already exists"
        ))),
        _ => Ok(()),
    }
}

/// A concurrent write can still win the unique index after the check above.
fn registration_conflict(err: anyhow::Error, registration: &str) -> ApiError {
    if is_unique_violation(&err) {
        ApiError::Conflict(format!("Vehicle {registration} already exists"))
    } else {
        ApiError::from(err)
    }
}

pub async fn list_vehicles(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<ApiResponse<Vec<VehicleDto>>>, ApiError> {
    require_permission(&state, &user, "vehicles.view").await?;

    let vehicles = state.store().list_vehicles().await?;
    Ok(Json(ApiResponse::success(
        vehicles.into_iter().map(VehicleDto::from).collect(),
    )))
}

pub async fn get_vehicle(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<VehicleDto>>, ApiError> {
    require_permission(&state, &user, "vehicles.view").await?;
    let id = validate_id(id, "vehicle")?;

    let vehicle = state
        .store()
        .get_vehicle(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Vehicle", id))?;
    Ok(Json(ApiResponse::success(vehicle.into())))
}

pub async fn create_vehicle(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Json(payload): Json<VehicleRequest>,
) -> Result<Json<ApiResponse<VehicleDto>>, ApiError> {
    require_permission(&state, &user, "vehicles.create").await?;

    let input = payload.into_input()?;
    ensure_registration_free(&state, &input.registration, None).await?;

    let registration = input.registration.clone();
    let vehicle = state
        .store()
        .create_vehicle(input)
        .await
        .map_err(|e| registration_conflict(e, &registration))?;
    tracing::info!(vehicle_id = vehicle.id, user_id = user.id, "Vehicle created");
    Ok(Json(ApiResponse::success(vehicle.into())))
}

pub async fn update_vehicle(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i32>,
    Json(payload): Json<VehicleRequest>,
) -> Result<Json<ApiResponse<VehicleDto>>, ApiError> {
    require_permission(&state, &user, "vehicles.edit").await?;
    let id = validate_id(id, "vehicle")?;

    let input = payload.into_input()?;
    ensure_registration_free(&state, &input.registration, Some(id)).await?;

    let registration = input.registration.clone();
    let vehicle = state
        .store()
        .update_vehicle(id, input)
        .await
        .map_err(|e| registration_conflict(e, &registration))?
        .ok_or_else(|| ApiError::not_found("Vehicle", id))?;
    Ok(Json(ApiResponse::success(vehicle.into())))
}

pub async fn delete_vehicle(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    require_permission(&state, &user, "vehicles.delete").await?;
    let id = validate_id(id, "vehicle")?;

    if !state.store().delete_vehicle(id).await? {
        return Err(ApiError::not_found("Vehicle", id));
    }

    tracing::info!(vehicle_id = id, user_id = user.id, "Vehicle deleted");
    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Vehicle deleted",
    ))))
}
