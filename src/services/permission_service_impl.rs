//! `SeaORM` implementation of the `PermissionService` trait.

use async_trait::async_trait;
use tracing::info;

use crate::db::{NewRole, Store};
use crate::domain::PermissionSet;
use crate::services::permission_service::{
    CreateRole, PermissionDto, PermissionError, PermissionService, RoleDto, parse_permission,
};

pub struct SeaOrmPermissionService {
    store: Store,
}

impl SeaOrmPermissionService {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    async fn ensure_user(&self, user_id: i32) -> Result<(), PermissionError> {
        self.store
            .get_user(user_id)
            .await?
            .map(|_| ())
            .ok_or(PermissionError::UserNotFound(user_id))
    }

    async fn load_role(&self, role_id: i32) -> Result<crate::db::Role, PermissionError> {
        self.store
            .get_role(role_id)
            .await?
            .ok_or(PermissionError::RoleNotFound(role_id))
    }

    async fn ensure_in_catalog(&self, name: &str) -> Result<(), PermissionError> {
        if self.store.is_permission_active(name).await? {
            Ok(())
        } else {
            Err(PermissionError::UnknownPermission(name.to_string()))
        }
    }
}

#[async_trait]
impl PermissionService for SeaOrmPermissionService {
    async fn has_permission(
        &self,
        user_id: i32,
        permission: &str,
    ) -> Result<bool, PermissionError> {
        if self
            .store
            .user_has_direct_permission(user_id, permission)
            .await?
        {
            return Ok(true);
        }

        let roles = self.store.get_roles_for_user(user_id).await?;
        Ok(roles
            .iter()
            .any(|role| role.is_active && role.permissions.contains(permission)))
    }

    async fn effective_permissions(&self, user_id: i32) -> Result<PermissionSet, PermissionError> {
        let mut set: PermissionSet = self
            .store
            .get_direct_permissions(user_id)
            .await?
            .into_iter()
            .collect();

        for role in self.store.get_roles_for_user(user_id).await? {
            if role.is_active {
                set.union_with(&role.permissions);
            }
        }

        Ok(set)
    }

    async fn assign_role_to_user(
        &self,
        user_id: i32,
        role_id: i32,
    ) -> Result<bool, PermissionError> {
        self.ensure_user(user_id).await?;
        let role = self.load_role(role_id).await?;

        let inserted = self.store.assign_role_to_user(user_id, role_id).await?;
        if inserted {
            info!(user_id, role = %role.name, "Role assigned");
        }
        Ok(inserted)
    }

    async fn remove_role_from_user(
        &self,
        user_id: i32,
        role_id: i32,
    ) -> Result<bool, PermissionError> {
        let removed = self.store.remove_role_from_user(user_id, role_id).await?;
        if removed {
            info!(user_id, role_id, "Role removed");
        }
        Ok(removed)
    }

    async fn assign_permission_to_role(
        &self,
        role_id: i32,
        permission: &str,
    ) -> Result<RoleDto, PermissionError> {
        let name = parse_permission(permission)?;
        self.ensure_in_catalog(name.as_str()).await?;

        let mut role = self.load_role(role_id).await?;
        if role.permissions.insert(&name) {
            self.store
                .update_role_permissions(role_id, &role.permissions)
                .await?;
            info!(role = %role.name, permission = %name, "Permission added to role");
        }

        Ok(role.into())
    }

    async fn remove_permission_from_role(
        &self,
        role_id: i32,
        permission: &str,
    ) -> Result<RoleDto, PermissionError> {
        let mut role = self.load_role(role_id).await?;
        if role.permissions.remove(permission) {
            self.store
                .update_role_permissions(role_id, &role.permissions)
                .await?;
            info!(role = %role.name, permission, "Permission removed from role");
        }

        Ok(role.into())
    }

    async fn grant_permission_to_user(
        &self,
        user_id: i32,
        permission: &str,
    ) -> Result<bool, PermissionError> {
        let name = parse_permission(permission)?;
        self.ensure_in_catalog(name.as_str()).await?;
        self.ensure_user(user_id).await?;

        Ok(self
            .store
            .grant_user_permission(user_id, name.as_str())
            .await?)
    }

    async fn revoke_permission_from_user(
        &self,
        user_id: i32,
        permission: &str,
    ) -> Result<bool, PermissionError> {
        Ok(self
            .store
            .revoke_user_permission(user_id, permission)
            .await?)
    }

    async fn list_roles(&self) -> Result<Vec<RoleDto>, PermissionError> {
        let roles = self.store.list_roles().await?;
        Ok(roles.into_iter().map(RoleDto::from).collect())
    }

    async fn create_role(&self, role: CreateRole) -> Result<RoleDto, PermissionError> {
        let name = role.name.trim().to_lowercase();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(PermissionError::Validation(
                "Role name must be lowercase letters, digits or underscores".to_string(),
            ));
        }

        if self.store.get_role_by_name(&name).await?.is_some() {
            return Err(PermissionError::RoleExists(name));
        }

        let mut permissions = PermissionSet::new();
        for raw in &role.permissions {
            let parsed = parse_permission(raw)?;
            self.ensure_in_catalog(parsed.as_str()).await?;
            permissions.insert(&parsed);
        }

        let display_name = if role.display_name.trim().is_empty() {
            name.clone()
        } else {
            role.display_name.trim().to_string()
        };

        let created = self
            .store
            .create_role(NewRole {
                name,
                display_name,
                description: role.description,
                permissions,
            })
            .await?;

        info!(role = %created.name, "Role created");
        Ok(created.into())
    }

    async fn list_permissions(&self) -> Result<Vec<PermissionDto>, PermissionError> {
        let catalog = self.store.list_permissions().await?;
        Ok(catalog
            .into_iter()
            .map(|p| PermissionDto {
                name: p.name,
                display_name: p.display_name,
                module: p.module,
                action: p.action,
                is_active: p.is_active,
            })
            .collect())
    }

    async fn roles_for_user(&self, user_id: i32) -> Result<Vec<RoleDto>, PermissionError> {
        let roles = self.store.get_roles_for_user(user_id).await?;
        Ok(roles.into_iter().map(RoleDto::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::db::NewUser;
    use crate::db::test_support::test_store;
    use crate::entities::roles;
    use sea_orm::{ActiveModelTrait, EntityTrait, Set};

    async fn setup() -> (Store, SeaOrmPermissionService) {
        let store = test_store().await;
        let service = SeaOrmPermissionService::new(store.clone());
        (store, service)
    }

    async fn create_user(store: &Store, email: &str) -> i32 {
        store
            .create_user(
                NewUser {
                    email: email.to_string(),
                    name: "Test".to_string(),
                    password: "password123".to_string(),
                    role: "viewer".to_string(),
                    is_admin: false,
                    notification_email: None,
                    phone: None,
                },
                &SecurityConfig::default(),
            )
            .await
            .unwrap()
            .id
    }

    async fn set_raw_permissions(store: &Store, role_id: i32, raw: Option<&str>) {
        let model = roles::Entity::find_by_id(role_id)
            .one(&store.conn)
            .await
            .unwrap()
            .unwrap();
        let mut active: roles::ActiveModel = model.into();
        active.permissions = Set(raw.map(str::to_string));
        active.update(&store.conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_super_admin_has_roles_manage() {
        let (store, service) = setup().await;
        let admin = store
            .get_user_by_email(crate::constants::bootstrap::ADMIN_EMAIL)
            .await
            .unwrap()
            .unwrap();

        assert!(service.has_permission(admin.id, "roles.manage").await.unwrap());
        assert!(
            !service
                .has_permission(admin.id, "nonexistent.permission")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_role_assignment_grants_and_removal_revokes() {
        let (store, service) = setup().await;
        let user_id = create_user(&store, "tech@example.com").await;
        let technician = store.get_role_by_name("technician").await.unwrap().unwrap();

        assert!(!service.has_permission(user_id, "vehicles.view").await.unwrap());

        assert!(service.assign_role_to_user(user_id, technician.id).await.unwrap());
        assert!(!service.assign_role_to_user(user_id, technician.id).await.unwrap());
        for permission in technician.permissions.iter() {
            assert!(service.has_permission(user_id, permission).await.unwrap());
        }

        assert!(service.remove_role_from_user(user_id, technician.id).await.unwrap());
        assert!(!service.has_permission(user_id, "vehicles.view").await.unwrap());
    }

    #[tokio::test]
    async fn test_permission_survives_removal_when_granted_directly() {
        let (store, service) = setup().await;
        let user_id = create_user(&store, "direct@example.com").await;
        let viewer = store.get_role_by_name("viewer").await.unwrap().unwrap();

        service.assign_role_to_user(user_id, viewer.id).await.unwrap();
        service
            .grant_permission_to_user(user_id, "vehicles.view")
            .await
            .unwrap();
        service.remove_role_from_user(user_id, viewer.id).await.unwrap();

        assert!(service.has_permission(user_id, "vehicles.view").await.unwrap());

        service
            .revoke_permission_from_user(user_id, "vehicles.view")
            .await
            .unwrap();
        assert!(!service.has_permission(user_id, "vehicles.view").await.unwrap());
    }

    #[tokio::test]
    async fn test_assign_permission_to_role_validates_on_write() {
        let (store, service) = setup().await;
        let viewer = store.get_role_by_name("viewer").await.unwrap().unwrap();

        assert!(matches!(
            service.assign_permission_to_role(viewer.id, "not a token").await,
            Err(PermissionError::Validation(_))
        ));
        assert!(matches!(
            service
                .assign_permission_to_role(viewer.id, "spaceships.launch")
                .await,
            Err(PermissionError::UnknownPermission(_))
        ));

        let role = service
            .assign_permission_to_role(viewer.id, "vehicles.delete")
            .await
            .unwrap();
        assert!(role.permissions.contains(&"vehicles.delete".to_string()));

        let role = service
            .remove_permission_from_role(viewer.id, "vehicles.delete")
            .await
            .unwrap();
        assert!(!role.permissions.contains(&"vehicles.delete".to_string()));
    }

    #[tokio::test]
    async fn test_null_or_malformed_permissions_column_grants_nothing() {
        let (store, service) = setup().await;
        let user_id = create_user(&store, "null@example.com").await;
        let viewer = store.get_role_by_name("viewer").await.unwrap().unwrap();
        service.assign_role_to_user(user_id, viewer.id).await.unwrap();

        set_raw_permissions(&store, viewer.id, None).await;
        assert!(service.effective_permissions(user_id).await.unwrap().is_empty());

        set_raw_permissions(&store, viewer.id, Some("not json")).await;
        assert!(service.effective_permissions(user_id).await.unwrap().is_empty());

        // Writing through the service repairs the column.
        service
            .assign_permission_to_role(viewer.id, "vehicles.view")
            .await
            .unwrap();
        assert!(service.has_permission(user_id, "vehicles.view").await.unwrap());
    }

    #[tokio::test]
    async fn test_inactive_role_grants_nothing() {
        let (store, service) = setup().await;
        let user_id = create_user(&store, "inactive@example.com").await;
        let viewer = store.get_role_by_name("viewer").await.unwrap().unwrap();
        service.assign_role_to_user(user_id, viewer.id).await.unwrap();

        let model = roles::Entity::find_by_id(viewer.id)
            .one(&store.conn)
            .await
            .unwrap()
            .unwrap();
        let mut active: roles::ActiveModel = model.into();
        active.is_active = Set(false);
        active.update(&store.conn).await.unwrap();

        assert!(!service.has_permission(user_id, "vehicles.view").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_role_rejects_duplicates() {
        let (_store, service) = setup().await;
        let role = service
            .create_role(CreateRole {
                name: "dispatcher".to_string(),
                display_name: "Dispatcher".to_string(),
                description: None,
                permissions: vec!["vehicles.view".to_string(), "vehicles.view".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(role.permissions, vec!["vehicles.view".to_string()]);

        assert!(matches!(
            service
                .create_role(CreateRole {
                    name: "dispatcher".to_string(),
                    display_name: String::new(),
                    description: None,
                    permissions: vec![],
                })
                .await,
            Err(PermissionError::RoleExists(_))
        ));
    }
}
