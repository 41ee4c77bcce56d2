use crate::constants::bootstrap;
use crate::domain::PermissionSet;
use crate::entities::{permissions, roles, user_roles, users};
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ActiveModelTrait, EntityTrait, Set};

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Permission catalog: (name, display name).
const CATALOG: &[(&str, &str)] = &[
    ("users.view", "View users"),
    ("users.create", "Create users"),
    ("users.edit", "Edit users"),
    ("roles.view", "View roles"),
    ("roles.manage", "Manage roles and permissions"),
    ("vehicles.view", "View vehicles"),
    ("vehicles.create", "Create vehicles"),
    ("vehicles.edit", "Edit vehicles"),
    ("vehicles.delete", "Delete vehicles"),
    ("interventions.view", "View interventions"),
    ("interventions.create", "Create interventions"),
    ("interventions.edit", "Edit interventions"),
    ("interventions.delete", "Delete interventions"),
    ("teams.view", "View teams"),
    ("teams.manage", "Manage teams"),
];

struct BuiltinRole {
    name: &'static str,
    display_name: &'static str,
    description: &'static str,
    /// `None` grants the whole catalog.
    permissions: Option<&'static [&'static str]>,
}

const BUILTIN_ROLES: &[BuiltinRole] = &[
    BuiltinRole {
        name: "super_admin",
        display_name: "Super administrator",
        description: "Full access, including role management",
        permissions: None,
    },
    BuiltinRole {
        name: "admin",
        display_name: "Administrator",
        description: "Manages users and the fleet",
        permissions: Some(&[
            "users.view",
            "users.create",
            "users.edit",
            "roles.view",
            "vehicles.view",
            "vehicles.create",
            "vehicles.edit",
            "vehicles.delete",
            "interventions.view",
            "interventions.create",
            "interventions.edit",
            "interventions.delete",
            "teams.view",
            "teams.manage",
        ]),
    },
    BuiltinRole {
        name: "technician",
        display_name: "Technician",
        description: "Works on vehicles and interventions",
        permissions: Some(&[
            "vehicles.view",
            "vehicles.edit",
            "interventions.view",
            "interventions.edit",
        ]),
    },
    BuiltinRole {
        name: "viewer",
        display_name: "Viewer",
        description: "Read-only access",
        permissions: Some(&["vehicles.view", "interventions.view", "teams.view"]),
    },
];

fn hash_default_password() -> Result<String, DbErr> {
    use argon2::{
        Argon2,
        password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
    };

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(bootstrap::ADMIN_PASSWORD.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DbErr::Custom(format!("Failed to hash default password: {e}")))
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        let now = chrono::Utc::now().to_rfc3339();

        for (name, display_name) in CATALOG {
            let (module, action) = name.split_once('.').unwrap_or((*name, ""));
            permissions::ActiveModel {
                name: Set((*name).to_string()),
                display_name: Set((*display_name).to_string()),
                module: Set(module.to_string()),
                action: Set(action.to_string()),
                is_active: Set(true),
                ..Default::default()
            }
            .insert(db)
            .await?;
        }

        let mut bootstrap_role_id = None;
        for role in BUILTIN_ROLES {
            let set: PermissionSet = role
                .permissions
                .map_or_else(
                    || CATALOG.iter().map(|(name, _)| *name).collect(),
                    |names| names.iter().copied().collect(),
                );

            let model = roles::ActiveModel {
                name: Set(role.name.to_string()),
                display_name: Set(role.display_name.to_string()),
                description: Set(Some(role.description.to_string())),
                permissions: Set(Some(set.to_column())),
                is_active: Set(true),
                created_at: Set(now.clone()),
                updated_at: Set(now.clone()),
                ..Default::default()
            }
            .insert(db)
            .await?;

            if role.name == bootstrap::ADMIN_ROLE {
                bootstrap_role_id = Some(model.id);
            }
        }

        let admin = users::ActiveModel {
            email: Set(bootstrap::ADMIN_EMAIL.to_string()),
            password_hash: Set(hash_default_password()?),
            name: Set("Administrator".to_string()),
            role: Set(bootstrap::ADMIN_ROLE.to_string()),
            is_admin: Set(true),
            notification_email: Set(None),
            phone: Set(None),
            two_factor_enabled: Set(false),
            two_factor_recovery_codes: Set(None),
            session_timeout_minutes: Set(None),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;

        if let Some(role_id) = bootstrap_role_id {
            user_roles::Entity::insert(user_roles::ActiveModel {
                user_id: Set(admin.id),
                role_id: Set(role_id),
            })
            .exec_without_returning(db)
            .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        user_roles::Entity::delete_many().exec(db).await?;
        users::Entity::delete_many().exec(db).await?;
        roles::Entity::delete_many().exec(db).await?;
        permissions::Entity::delete_many().exec(db).await?;

        Ok(())
    }
}
