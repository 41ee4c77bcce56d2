use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::OnConflict,
};

use crate::entities::{permissions, prelude::*, user_permissions};

pub struct PermissionRepository {
    conn: DatabaseConnection,
}

impl PermissionRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Catalog ordered by module, then action
    pub async fn list(&self) -> Result<Vec<permissions::Model>> {
        Permissions::find()
            .order_by_asc(permissions::Column::Module)
            .order_by_asc(permissions::Column::Action)
            .all(&self.conn)
            .await
            .context("Failed to list permissions")
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<permissions::Model>> {
        Permissions::find()
            .filter(permissions::Column::Name.eq(name))
            .one(&self.conn)
            .await
            .context("Failed to query permission by name")
    }

    pub async fn is_active(&self, name: &str) -> Result<bool> {
        Ok(self.get_by_name(name).await?.is_some_and(|p| p.is_active))
    }

    /// Names granted to the user directly.
    pub async fn direct_for_user(&self, user_id: i32) -> Result<Vec<String>> {
        let rows = UserPermissions::find()
            .filter(user_permissions::Column::UserId.eq(user_id))
            .all(&self.conn)
            .await
            .context("Failed to query direct permissions")?;

        Ok(rows.into_iter().map(|r| r.permission_name).collect())
    }

    pub async fn user_has_direct(&self, user_id: i32, name: &str) -> Result<bool> {
        let row = UserPermissions::find_by_id((user_id, name.to_string()))
            .one(&self.conn)
            .await
            .context("Failed to query direct permission")?;

        Ok(row.is_some())
    }

    /// Returns `false` when the grant already existed.
    pub async fn grant_to_user(&self, user_id: i32, name: &str) -> Result<bool> {
        let inserted = UserPermissions::insert(user_permissions::ActiveModel {
            user_id: Set(user_id),
            permission_name: Set(name.to_string()),
        })
        .on_conflict(
            OnConflict::columns([
                user_permissions::Column::UserId,
                user_permissions::Column::PermissionName,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(&self.conn)
        .await
        .context("Failed to grant permission")?;

        Ok(inserted > 0)
    }

    pub async fn revoke_from_user(&self, user_id: i32, name: &str) -> Result<bool> {
        let result = UserPermissions::delete_many()
            .filter(user_permissions::Column::UserId.eq(user_id))
            .filter(user_permissions::Column::PermissionName.eq(name))
            .exec(&self.conn)
            .await
            .context("Failed to revoke permission")?;

        Ok(result.rows_affected > 0)
    }
}
