use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::{prelude::*, vehicles};

pub use crate::entities::vehicles::Model as Vehicle;

pub struct VehicleInput {
    pub registration: String,
    pub brand: String,
    pub model_name: String,
    pub year: Option<i32>,
    pub status: String,
}

pub struct VehicleRepository {
    conn: DatabaseConnection,
}

impl VehicleRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn list(&self) -> Result<Vec<Vehicle>> {
        Vehicles::find()
            .order_by_asc(vehicles::Column::Registration)
            .all(&self.conn)
            .await
            .context("Failed to list vehicles")
    }

    pub async fn get(&self, id: i32) -> Result<Option<Vehicle>> {
        Vehicles::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query vehicle")
    }

    pub async fn get_by_registration(&self, registration: &str) -> Result<Option<Vehicle>> {
        Vehicles::find()
            .filter(vehicles::Column::Registration.eq(registration))
            .one(&self.conn)
            .await
            .context("Failed to query vehicle by registration")
    }

    pub async fn create(&self, input: VehicleInput) -> Result<Vehicle> {
        let now = chrono::Utc::now().to_rfc3339();

        vehicles::ActiveModel {
            registration: Set(input.registration),
            brand: Set(input.brand),
            model_name: Set(input.model_name),
            year: Set(input.year),
            status: Set(input.status),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert vehicle")
    }

    pub async fn update(&self, id: i32, input: VehicleInput) -> Result<Option<Vehicle>> {
        let Some(existing) = self.get(id).await? else {
            return Ok(None);
        };

        let mut active: vehicles::ActiveModel = existing.into();
        active.registration = Set(input.registration);
        active.brand = Set(input.brand);
        active.model_name = Set(input.model_name);
        active.year = Set(input.year);
        active.status = Set(input.status);
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());

        let updated = active
            .update(&self.conn)
            .await
            .context("Failed to update vehicle")?;

        Ok(Some(updated))
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        let result = Vehicles::delete_by_id(id)
            .exec(&self.conn)
            .await
            .context("Failed to delete vehicle")?;

        Ok(result.rows_affected > 0)
    }
}
