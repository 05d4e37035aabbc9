use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;
use validator::Validate;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::UserRepo,
    },
    models::{CreateUser, LoginRecord, UpdateUserProfile, User},
};

const USER_COLUMNS: &str = "id, email, first_name, last_name, display_name, provider, \
     provider_id, email_verified, is_active, last_login_at, sso_profile, created_at, updated_at";

pub struct SqliteUserRepo {
    pool: SqlitePool,
}

impl SqliteUserRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn user_from_row(row: &SqliteRow, roles: Vec<String>) -> DbResult<User> {
        let sso_profile = row
            .get::<Option<String>, _>("sso_profile")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;

        Ok(User {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            email: row.get("email"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            display_name: row.get("display_name"),
            provider: row.get("provider"),
            provider_id: row.get("provider_id"),
            email_verified: row.get("email_verified"),
            is_active: row.get("is_active"),
            roles,
            last_login_at: row.get("last_login_at"),
            sso_profile,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn roles_for(&self, user_id: &str) -> DbResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT r.name
            FROM roles r
            INNER JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = ?
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    async fn fetch_one_where(&self, column: &str, value: &str) -> DbResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let id: String = row.get("id");
                let roles = self.roles_for(&id).await?;
                Ok(Some(Self::user_from_row(&row, roles)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UserRepo for SqliteUserRepo {
    async fn create(&self, input: CreateUser) -> DbResult<User> {
        input.validate()?;

        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let sso_profile = input
            .sso_profile
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, first_name, last_name, display_name, provider, provider_id,
                email_verified, is_active, last_login_at, sso_profile, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, NULL, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.display_name)
        .bind(&input.provider)
        .bind(&input.provider_id)
        .bind(input.email_verified)
        .bind(&sso_profile)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!("User with email '{}' already exists", input.email))
            }
            _ => DbError::from(e),
        })?;

        sqlx::query("INSERT INTO roles (id, name) VALUES (?, ?) ON CONFLICT (name) DO NOTHING")
            .bind(Uuid::new_v4().to_string())
            .bind(&input.default_role)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, created_at)
            SELECT ?, id, ? FROM roles WHERE name = ?
            "#,
        )
        .bind(id.to_string())
        .bind(now)
        .bind(&input.default_role)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(User {
            id,
            email: input.email,
            first_name: input.first_name,
            last_name: input.last_name,
            display_name: input.display_name,
            provider: input.provider,
            provider_id: input.provider_id,
            email_verified: input.email_verified,
            is_active: true,
            roles: vec![input.default_role],
            last_login_at: None,
            sso_profile: input.sso_profile,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<User>> {
        self.fetch_one_where("id", &id.to_string()).await
    }

    async fn get_by_email(&self, email: &str) -> DbResult<Option<User>> {
        self.fetch_one_where("email", email).await
    }

    async fn update_profile(&self, id: Uuid, input: UpdateUserProfile) -> DbResult<User> {
        input.validate()?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                display_name = COALESCE(?, display_name),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.display_name)
        .bind(chrono::Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }

    async fn record_login(&self, id: Uuid, record: LoginRecord) -> DbResult<()> {
        if record.is_empty() {
            return Ok(());
        }

        let sso_profile = record
            .sso_profile
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = COALESCE(?, last_login_at),
                sso_profile = COALESCE(?, sso_profile),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(record.last_login_at)
        .bind(&sso_profile)
        .bind(chrono::Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
