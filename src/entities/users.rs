use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub email: String,

    /// Argon2id password hash
    pub password_hash: String,

    pub name: String,

    /// Legacy display role, kept alongside the `user_roles` assignments.
    pub role: String,

    pub is_admin: bool,

    pub notification_email: Option<String>,

    pub phone: Option<String>,

    pub two_factor_enabled: bool,

    /// JSON array of unused recovery codes.
    pub two_factor_recovery_codes: Option<String>,

    /// Personal inactivity timeout; `None` falls back to the configured default.
    pub session_timeout_minutes: Option<i32>,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_roles::Entity")]
    UserRoles,
    #[sea_orm(has_many = "super::user_permissions::Entity")]
    UserPermissions,
}

impl Related<super::user_roles::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserRoles.def()
    }
}

impl Related<super::user_permissions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserPermissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
