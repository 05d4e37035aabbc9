use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::{parse_token_kind, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TokenRepo,
    },
    models::TokenRecord,
};

pub struct SqliteTokenRepo {
    pool: SqlitePool,
}

impl SqliteTokenRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepo for SqliteTokenRepo {
    async fn insert(&self, record: TokenRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO session_tokens (jti, pair_id, user_id, kind, issued_at, expires_at, revoked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.jti.to_string())
        .bind(record.pair_id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.kind.as_str())
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!("Token '{}' already recorded", record.jti))
            }
            _ => DbError::from(e),
        })?;

        Ok(())
    }

    async fn get(&self, jti: Uuid) -> DbResult<Option<TokenRecord>> {
        let row = sqlx::query(
            r#"
            SELECT jti, pair_id, user_id, kind, issued_at, expires_at, revoked_at
            FROM session_tokens
            WHERE jti = ?
            "#,
        )
        .bind(jti.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(TokenRecord {
                jti: parse_uuid(&row.get::<String, _>("jti"))?,
                pair_id: parse_uuid(&row.get::<String, _>("pair_id"))?,
                user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
                kind: parse_token_kind(&row.get::<String, _>("kind"))?,
                issued_at: row.get("issued_at"),
                expires_at: row.get("expires_at"),
                revoked_at: row.get("revoked_at"),
            })
        })
        .transpose()
    }

    async fn revoke_pair(&self, pair_id: Uuid, at: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE session_tokens SET revoked_at = ? WHERE pair_id = ? AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(pair_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM session_tokens WHERE expires_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
