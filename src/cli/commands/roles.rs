//! Role command handlers

use anyhow::Context;

use crate::config::Config;
use crate::state::SharedState;

pub async fn cmd_list_roles(config: Config) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;
    let roles = state.permission_service.list_roles().await?;

    println!("Roles ({} total)", roles.len());
    println!("{:-<70}", "");

    for role in roles {
        let marker = if role.is_active { "•" } else { "✗" };
        println!("{} {} ({})", marker, role.name, role.display_name);
        if role.permissions.is_empty() {
            println!("    (no permissions)");
        } else {
            println!("    {}", role.permissions.join(", "));
        }
    }

    Ok(())
}

pub async fn cmd_assign_role(config: Config, email: &str, role_name: &str) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;

    let user = state
        .store
        .get_user_by_email(email)
        .await?
        .with_context(|| format!("No user with email {email}"))?;
    let role = state
        .store
        .get_role_by_name(role_name)
        .await?
        .with_context(|| format!("Unknown role: {role_name}"))?;

    let changed = state
        .permission_service
        .assign_role_to_user(user.id, role.id)
        .await?;

    if changed {
        println!("✓ Assigned {} to {}", role.name, user.email);
    } else {
        println!("{} already has {}", user.email, role.name);
    }

    Ok(())
}
