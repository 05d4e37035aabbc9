use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::UserRepo,
    },
    models::{CreateUser, LoginRecord, UpdateUserProfile, User},
};

const USER_COLUMNS: &str = "id, email, first_name, last_name, display_name, provider, \
     provider_id, email_verified, is_active, last_login_at, sso_profile, created_at, updated_at";

pub struct PostgresUserRepo {
    pool: PgPool,
}

impl PostgresUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn user_from_row(row: &PgRow, roles: Vec<String>) -> User {
        User {
            id: row.get("id"),
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
            sso_profile: row
                .get::<Option<Json<serde_json::Value>>, _>("sso_profile")
                .map(|j| j.0),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    async fn roles_for(&self, user_id: Uuid) -> DbResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT r.name
            FROM roles r
            INNER JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    async fn hydrate(&self, row: Option<PgRow>) -> DbResult<Option<User>> {
        match row {
            Some(row) => {
                let roles = self.roles_for(row.get("id")).await?;
                Ok(Some(Self::user_from_row(&row, roles)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UserRepo for PostgresUserRepo {
    async fn create(&self, input: CreateUser) -> DbResult<User> {
        input.validate()?;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (
                id, email, first_name, last_name, display_name, provider, provider_id,
                email_verified, is_active, sso_profile
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.display_name)
        .bind(&input.provider)
        .bind(&input.provider_id)
        .bind(input.email_verified)
        .bind(input.sso_profile.as_ref().map(Json))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!("User with email '{}' already exists", input.email))
            }
            _ => DbError::from(e),
        })?;

        let user_id: Uuid = row.get("id");

        sqlx::query("INSERT INTO roles (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
            .bind(Uuid::new_v4())
            .bind(&input.default_role)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, id FROM roles WHERE name = $2
            "#,
        )
        .bind(user_id)
        .bind(&input.default_role)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Self::user_from_row(&row, vec![input.default_role]))
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn get_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn update_profile(&self, id: Uuid, input: UpdateUserProfile) -> DbResult<User> {
        input.validate()?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET first_name = COALESCE($1, first_name),
                last_name = COALESCE($2, last_name),
                display_name = COALESCE($3, display_name),
                updated_at = NOW()
            WHERE id = $4
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.display_name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await?.ok_or(DbError::NotFound)
    }

    async fn record_login(&self, id: Uuid, record: LoginRecord) -> DbResult<()> {
        if record.is_empty() {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = COALESCE($1, last_login_at),
                sso_profile = COALESCE($2, sso_profile),
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(record.last_login_at)
        .bind(record.sso_profile.as_ref().map(Json))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
