pub mod otp;
pub mod password_reset;
pub mod permission;
pub mod role;
pub mod user;
pub mod vehicle;
