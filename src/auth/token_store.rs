//! Storage backends for issued-token records.
//!
//! Every issued token has a record keyed by its `jti`; validation consults
//! it so that revocation takes effect immediately.
//! - `MemoryTokenStore`: in-process map (single node only)
//! - `DatabaseTokenStore`: the `session_tokens` table

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    config::TokenStoreBackend,
    db::{DbError, DbPool, TokenRepo},
    models::TokenRecord,
};

pub type TokenStoreResult<T> = Result<T, TokenStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Record a freshly issued token.
    async fn insert(&self, record: TokenRecord) -> TokenStoreResult<()>;

    /// Look up a token record by `jti`.
    async fn get(&self, jti: Uuid) -> TokenStoreResult<Option<TokenRecord>>;

    /// Revoke both tokens of a pair. Returns how many records changed.
    async fn revoke_pair(&self, pair_id: Uuid, at: DateTime<Utc>) -> TokenStoreResult<u64>;

    /// Remove records that expired before `before`.
    async fn purge_expired(&self, before: DateTime<Utc>) -> TokenStoreResult<u64>;
}

pub type SharedTokenStore = Arc<dyn TokenStore>;

#[derive(Default)]
pub struct MemoryTokenStore {
    records: RwLock<HashMap<Uuid, TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, record: TokenRecord) -> TokenStoreResult<()> {
        let mut records = self.records.write().await;
        records.insert(record.jti, record);
        Ok(())
    }

    async fn get(&self, jti: Uuid) -> TokenStoreResult<Option<TokenRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&jti).cloned())
    }

    async fn revoke_pair(&self, pair_id: Uuid, at: DateTime<Utc>) -> TokenStoreResult<u64> {
        let mut records = self.records.write().await;
        let mut touched = 0;
        for record in records
            .values_mut()
            .filter(|r| r.pair_id == pair_id && r.revoked_at.is_none())
        {
            record.revoked_at = Some(at);
            touched += 1;
        }
        Ok(touched)
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> TokenStoreResult<u64> {
        let mut records = self.records.write().await;
        let count = records.len();
        records.retain(|_, r| r.expires_at >= before);
        Ok((count - records.len()) as u64)
    }
}

pub struct DatabaseTokenStore {
    repo: Arc<dyn TokenRepo>,
}

impl DatabaseTokenStore {
    pub fn new(repo: Arc<dyn TokenRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl TokenStore for DatabaseTokenStore {
    async fn insert(&self, record: TokenRecord) -> TokenStoreResult<()> {
        Ok(self.repo.insert(record).await?)
    }

    async fn get(&self, jti: Uuid) -> TokenStoreResult<Option<TokenRecord>> {
        Ok(self.repo.get(jti).await?)
    }

    async fn revoke_pair(&self, pair_id: Uuid, at: DateTime<Utc>) -> TokenStoreResult<u64> {
        Ok(self.repo.revoke_pair(pair_id, at).await?)
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> TokenStoreResult<u64> {
        Ok(self.repo.delete_expired(before).await?)
    }
}

/// Pick the token store for the configured backend.
pub fn create_token_store(backend: TokenStoreBackend, db: &DbPool) -> SharedTokenStore {
    match backend {
        TokenStoreBackend::Database => {
            tracing::info!("Using database-backed token store");
            Arc::new(DatabaseTokenStore::new(db.tokens()))
        }
        TokenStoreBackend::Memory => {
            tracing::warn!(
                "Using in-memory token store. Sessions will be lost on restart \
                 and not shared across nodes."
            );
            Arc::new(MemoryTokenStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::TokenKind;

    fn pair(user_id: Uuid, expires_at: DateTime<Utc>) -> (TokenRecord, TokenRecord) {
        let pair_id = Uuid::new_v4();
        let now = Utc::now();
        let record = |kind| TokenRecord {
            jti: Uuid::new_v4(),
            pair_id,
            user_id,
            kind,
            issued_at: now,
            expires_at,
            revoked_at: None,
        };
        (record(TokenKind::Access), record(TokenKind::Refresh))
    }

    #[tokio::test]
    async fn test_memory_store_revokes_whole_pair() {
        let store = MemoryTokenStore::new();
        let user = Uuid::new_v4();
        let (access, refresh) = pair(user, Utc::now() + Duration::hours(1));
        let (other, _) = pair(user, Utc::now() + Duration::hours(1));
        for record in [access.clone(), refresh.clone(), other.clone()] {
            store.insert(record).await.unwrap();
        }

        let now = Utc::now();
        assert_eq!(store.revoke_pair(access.pair_id, now).await.unwrap(), 2);
        assert_eq!(store.revoke_pair(access.pair_id, now).await.unwrap(), 0);

        assert!(!store.get(access.jti).await.unwrap().unwrap().is_usable_at(now));
        assert!(!store.get(refresh.jti).await.unwrap().unwrap().is_usable_at(now));
        assert!(store.get(other.jti).await.unwrap().unwrap().is_usable_at(now));
    }

    #[tokio::test]
    async fn test_memory_store_purges_expired() {
        let store = MemoryTokenStore::new();
        let user = Uuid::new_v4();
        let (expired, _) = pair(user, Utc::now() - Duration::minutes(1));
        let (live, _) = pair(user, Utc::now() + Duration::hours(1));
        store.insert(expired.clone()).await.unwrap();
        store.insert(live.clone()).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.get(expired.jti).await.unwrap().is_none());
        assert!(store.get(live.jti).await.unwrap().is_some());
    }
}
