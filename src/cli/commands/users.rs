//! User account command handlers

use anyhow::Context;

use crate::config::Config;
use crate::services::CreateUser;
use crate::state::SharedState;

pub async fn cmd_create_user(
    config: Config,
    email: &str,
    name: &str,
    password: &str,
    role_names: &[String],
    is_admin: bool,
) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;

    let mut role_ids = Vec::with_capacity(role_names.len());
    for role_name in role_names {
        let role = state
            .store
            .get_role_by_name(role_name)
            .await?
            .with_context(|| format!("Unknown role: {role_name}"))?;
        role_ids.push(role.id);
    }

    let user = state
        .auth_service
        .create_user(CreateUser {
            email: email.to_string(),
            name: name.to_string(),
            password: password.to_string(),
            is_admin,
            role_ids,
        })
        .await?;

    println!("✓ Created user {} (ID: {})", user.email, user.id);
    if is_admin {
        println!("  Administrator: two-factor authentication is mandatory");
    }

    Ok(())
}

pub async fn cmd_list_users(config: Config) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;
    let users = state.auth_service.list_users().await?;

    println!("Users ({} total)", users.len());
    println!("{:-<70}", "");

    for user in users {
        let roles = state.permission_service.roles_for_user(user.id).await?;
        let role_names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();

        println!(
            "{:>4}  {:<32} {}{}",
            user.id,
            user.email,
            if role_names.is_empty() {
                "-".to_string()
            } else {
                role_names.join(", ")
            },
            if user.two_factor_enabled { "  [2FA]" } else { "" }
        );
    }

    Ok(())
}
