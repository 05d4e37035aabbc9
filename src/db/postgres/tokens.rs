use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TokenRepo,
    },
    models::TokenRecord,
};

pub struct PostgresTokenRepo {
    pool: PgPool,
}

impl PostgresTokenRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepo for PostgresTokenRepo {
    async fn insert(&self, record: TokenRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO session_tokens (jti, pair_id, user_id, kind, issued_at, expires_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.jti)
        .bind(record.pair_id)
        .bind(record.user_id)
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
            WHERE jti = $1
            "#,
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(TokenRecord {
                jti: row.get("jti"),
                pair_id: row.get("pair_id"),
                user_id: row.get("user_id"),
                kind: row
                    .get::<String, _>("kind")
                    .parse()
                    .map_err(DbError::Internal)?,
                issued_at: row.get("issued_at"),
                expires_at: row.get("expires_at"),
                revoked_at: row.get("revoked_at"),
            })
        })
        .transpose()
    }

    async fn revoke_pair(&self, pair_id: Uuid, at: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE session_tokens SET revoked_at = $1 WHERE pair_id = $2 AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(pair_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM session_tokens WHERE expires_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
