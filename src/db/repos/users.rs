use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateUser, LoginRecord, UpdateUserProfile, User},
};

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Insert the user and attach `input.default_role` in one transaction.
    ///
    /// Returns `DbError::Conflict` if the email is already taken.
    async fn create(&self, input: CreateUser) -> DbResult<User>;
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<User>>;
    /// Exact, case-sensitive match.
    async fn get_by_email(&self, email: &str) -> DbResult<Option<User>>;
    async fn update_profile(&self, id: Uuid, input: UpdateUserProfile) -> DbResult<User>;
    async fn record_login(&self, id: Uuid, record: LoginRecord) -> DbResult<()>;
}
