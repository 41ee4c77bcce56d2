//! Permission guard used by handlers after `require_login` has run.

use tracing::warn;

use super::{ApiError, AppState};
use crate::services::SessionUser;

/// Fails with 403 unless `user` holds `permission`.
pub async fn require_permission(
    state: &AppState,
    user: &SessionUser,
    permission: &str,
) -> Result<(), ApiError> {
    if state
        .shared
        .permission_service
        .has_permission(user.id, permission)
        .await?
    {
        return Ok(());
    }

    warn!(user_id = user.id, permission, "Permission denied");
    Err(ApiError::forbidden(permission))
}
