pub use super::otp_codes::Entity as OtpCodes;
pub use super::password_reset_tokens::Entity as PasswordResetTokens;
pub use super::permissions::Entity as Permissions;
pub use super::roles::Entity as Roles;
pub use super::user_permissions::Entity as UserPermissions;
pub use super::user_roles::Entity as UserRoles;
pub use super::users::Entity as Users;
pub use super::vehicles::Entity as Vehicles;
