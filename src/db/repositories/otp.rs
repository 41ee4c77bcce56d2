use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, sea_query::OnConflict,
};

use crate::entities::{otp_codes, prelude::*};

pub use crate::entities::otp_codes::Model as OtpCode;

pub struct OtpRepository {
    conn: DatabaseConnection,
}

impl OtpRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Store a code for the user, replacing any code still pending.
    pub async fn upsert(&self, user_id: i32, code: &str, expires_at: i64) -> Result<()> {
        OtpCodes::insert(otp_codes::ActiveModel {
            user_id: Set(user_id),
            code: Set(code.to_string()),
            expires_at: Set(expires_at),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
        })
        .on_conflict(
            OnConflict::column(otp_codes::Column::UserId)
                .update_columns([
                    otp_codes::Column::Code,
                    otp_codes::Column::ExpiresAt,
                    otp_codes::Column::CreatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(&self.conn)
        .await
        .context("Failed to store OTP code")?;

        Ok(())
    }

    pub async fn get(&self, user_id: i32) -> Result<Option<OtpCode>> {
        OtpCodes::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query OTP code")
    }

    /// Delete the row only if it matches and is still valid at `now`.
    /// A single conditional DELETE keeps two racing verifications from both
    /// succeeding.
    pub async fn consume(&self, user_id: i32, code: &str, now: i64) -> Result<bool> {
        let result = OtpCodes::delete_many()
            .filter(otp_codes::Column::UserId.eq(user_id))
            .filter(otp_codes::Column::Code.eq(code))
            .filter(otp_codes::Column::ExpiresAt.gte(now))
            .exec(&self.conn)
            .await
            .context("Failed to consume OTP code")?;

        Ok(result.rows_affected == 1)
    }

    pub async fn delete_expired(&self, now: i64) -> Result<u64> {
        let result = OtpCodes::delete_many()
            .filter(otp_codes::Column::ExpiresAt.lt(now))
            .exec(&self.conn)
            .await
            .context("Failed to purge expired OTP codes")?;

        Ok(result.rows_affected)
    }

    pub async fn delete_for_user(&self, user_id: i32) -> Result<()> {
        OtpCodes::delete_by_id(user_id)
            .exec(&self.conn)
            .await
            .context("Failed to delete OTP code")?;
        Ok(())
    }
}
