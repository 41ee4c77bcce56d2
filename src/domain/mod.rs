//! Domain types for access control with strong typing.

pub mod permissions;

pub use permissions::{PermissionName, PermissionNameError, PermissionSet};
