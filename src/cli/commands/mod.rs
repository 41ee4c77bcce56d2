mod roles;
mod users;

pub use roles::{cmd_assign_role, cmd_list_roles};
pub use users::{cmd_create_user, cmd_list_users};
