use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, JoinType, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set, sea_query::OnConflict,
};
use tracing::warn;

use crate::domain::PermissionSet;
use crate::entities::{prelude::*, roles, user_roles};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: i32,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub permissions: PermissionSet,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<roles::Model> for Role {
    fn from(model: roles::Model) -> Self {
        let permissions = PermissionSet::from_column(model.permissions.as_deref())
            .unwrap_or_else(|e| {
                warn!(
                    role = %model.name,
                    error = %e,
                    "Malformed permissions column, treating role as granting nothing"
                );
                PermissionSet::new()
            });

        Self {
            id: model.id,
            name: model.name,
            display_name: model.display_name,
            description: model.description,
            permissions,
            is_active: model.is_active,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRole {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub permissions: PermissionSet,
}

pub struct RoleRepository {
    conn: DatabaseConnection,
}

impl RoleRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn list(&self) -> Result<Vec<Role>> {
        let rows = Roles::find()
            .order_by_asc(roles::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list roles")?;

        Ok(rows.into_iter().map(Role::from).collect())
    }

    pub async fn get(&self, id: i32) -> Result<Option<Role>> {
        let row = Roles::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query role by ID")?;

        Ok(row.map(Role::from))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Role>> {
        let row = Roles::find()
            .filter(roles::Column::Name.eq(name))
            .one(&self.conn)
            .await
            .context("Failed to query role by name")?;

        Ok(row.map(Role::from))
    }

    pub async fn create(&self, role: NewRole) -> Result<Role> {
        let now = chrono::Utc::now().to_rfc3339();

        let model = roles::ActiveModel {
            name: Set(role.name),
            display_name: Set(role.display_name),
            description: Set(role.description),
            permissions: Set(Some(role.permissions.to_column())),
            is_active: Set(true),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert role")?;

        Ok(Role::from(model))
    }

    /// Persist the full permission set of a role.
    pub async fn update_permissions(&self, id: i32, permissions: &PermissionSet) -> Result<()> {
        let model = Roles::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query role for permission update")?
            .ok_or_else(|| anyhow::anyhow!("Role not found: {id}"))?;

        let mut active: roles::ActiveModel = model.into();
        active.permissions = Set(Some(permissions.to_column()));
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        active.update(&self.conn).await?;

        Ok(())
    }

    /// All roles assigned to a user, active or not.
    pub async fn for_user(&self, user_id: i32) -> Result<Vec<Role>> {
        let rows = Roles::find()
            .join(JoinType::InnerJoin, roles::Relation::UserRoles.def())
            .filter(user_roles::Column::UserId.eq(user_id))
            .order_by_asc(roles::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to query roles for user")?;

        Ok(rows.into_iter().map(Role::from).collect())
    }

    /// Insert the join row. Returns `false` when the user already had the role.
    pub async fn assign_to_user(&self, user_id: i32, role_id: i32) -> Result<bool> {
        let inserted = UserRoles::insert(user_roles::ActiveModel {
            user_id: Set(user_id),
            role_id: Set(role_id),
        })
        .on_conflict(
            OnConflict::columns([user_roles::Column::UserId, user_roles::Column::RoleId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&self.conn)
        .await
        .context("Failed to assign role to user")?;

        Ok(inserted > 0)
    }

    /// Delete the join row. Returns `false` when there was nothing to delete.
    pub async fn remove_from_user(&self, user_id: i32, role_id: i32) -> Result<bool> {
        let result = UserRoles::delete_many()
            .filter(user_roles::Column::UserId.eq(user_id))
            .filter(user_roles::Column::RoleId.eq(role_id))
            .exec(&self.conn)
            .await
            .context("Failed to remove role from user")?;

        Ok(result.rows_affected > 0)
    }
}
