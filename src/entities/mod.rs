pub mod prelude;

pub mod otp_codes;
pub mod password_reset_tokens;
pub mod permissions;
pub mod roles;
pub mod user_permissions;
pub mod user_roles;
pub mod users;
pub mod vehicles;
