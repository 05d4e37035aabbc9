use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{db::error::DbResult, models::TokenRecord};

#[async_trait]
pub trait TokenRepo: Send + Sync {
    async fn insert(&self, record: TokenRecord) -> DbResult<()>;
    async fn get(&self, jti: Uuid) -> DbResult<Option<TokenRecord>>;
    /// Revoke every token of the pair that is not already revoked.
    /// Returns the number of records touched.
    async fn revoke_pair(&self, pair_id: Uuid, at: DateTime<Utc>) -> DbResult<u64>;
    /// Delete records that expired before `before`.
    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64>;
}
