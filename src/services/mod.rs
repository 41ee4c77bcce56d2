pub mod mailer;
pub use mailer::{LogMailer, MailError, MailMessage, Mailer};

pub mod session;
pub use session::{SessionError, SessionManager, SessionUser};

pub mod permission_service;
pub mod permission_service_impl;
pub use permission_service::{
    CreateRole, PermissionDto, PermissionError, PermissionService, RoleDto,
};
pub use permission_service_impl::SeaOrmPermissionService;

pub mod two_factor_service;
pub mod two_factor_service_impl;
pub use two_factor_service::{TwoFactorError, TwoFactorService, TwoFactorStatus};
pub use two_factor_service_impl::SeaOrmTwoFactorService;

pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{AuthError, AuthService, CreateUser, LoginOutcome, UserInfo};
pub use auth_service_impl::SeaOrmAuthService;
