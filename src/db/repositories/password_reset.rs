use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, Set, sea_query::Expr,
};

use crate::entities::{password_reset_tokens, prelude::*};

pub struct PasswordResetRepository {
    conn: DatabaseConnection,
}

impl PasswordResetRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, user_id: i32, token: &str, expires_at: i64) -> Result<()> {
        PasswordResetTokens::insert(password_reset_tokens::ActiveModel {
            token: Set(token.to_string()),
            user_id: Set(user_id),
            expires_at: Set(expires_at),
            used: Set(false),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
        })
        .exec_without_returning(&self.conn)
        .await
        .context("Failed to store password reset token")?;

        Ok(())
    }

    /// Mark the token used if it is unused and valid at `now`, returning its owner.
    pub async fn consume(&self, token: &str, now: i64) -> Result<Option<i32>> {
        let result = PasswordResetTokens::update_many()
            .col_expr(password_reset_tokens::Column::Used, Expr::value(true))
            .filter(password_reset_tokens::Column::Token.eq(token))
            .filter(password_reset_tokens::Column::Used.eq(false))
            .filter(password_reset_tokens::Column::ExpiresAt.gte(now))
            .exec(&self.conn)
            .await
            .context("Failed to consume password reset token")?;

        if result.rows_affected != 1 {
            return Ok(None);
        }

        let row = PasswordResetTokens::find_by_id(token.to_string())
            .one(&self.conn)
            .await
            .context("Failed to load password reset token")?;

        Ok(row.map(|r| r.user_id))
    }

    /// Burn every outstanding token of a user (after a successful reset).
    pub async fn invalidate_for_user(&self, user_id: i32) -> Result<u64> {
        let result = PasswordResetTokens::update_many()
            .col_expr(password_reset_tokens::Column::Used, Expr::value(true))
            .filter(password_reset_tokens::Column::UserId.eq(user_id))
            .filter(password_reset_tokens::Column::Used.eq(false))
            .exec(&self.conn)
            .await
            .context("Failed to invalidate password reset tokens")?;

        Ok(result.rows_affected)
    }

    /// Drop tokens that are spent or expired at `now`.
    pub async fn delete_stale(&self, now: i64) -> Result<u64> {
        let result = PasswordResetTokens::delete_many()
            .filter(
                Condition::any()
                    .add(password_reset_tokens::Column::Used.eq(true))
                    .add(password_reset_tokens::Column::ExpiresAt.lt(now)),
            )
            .exec(&self.conn)
            .await
            .context("Failed to purge password reset tokens")?;

        Ok(result.rows_affected)
    }
}
