//! Periodic purge of expired authentication state.
//!
//! Each pass removes:
//! 1. Token records whose expiry has passed
//! 2. Replay-cache entries for assertions that could no longer be accepted
//! 3. Exchange codes nobody redeemed in time

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};

use crate::{
    auth::{ExchangeCodeStore, SharedTokenStore, TokenStoreError, saml::ReplayCache},
    config::JobsConfig,
};

/// Results from a single cleanup run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupRunResult {
    pub tokens_deleted: u64,
    pub replay_entries_deleted: usize,
    pub exchange_codes_deleted: usize,
    pub duration_ms: u64,
}

impl CleanupRunResult {
    pub fn has_deletions(&self) -> bool {
        self.tokens_deleted > 0 || self.replay_entries_deleted > 0 || self.exchange_codes_deleted > 0
    }
}

/// What the cleanup worker sweeps.
#[derive(Clone)]
pub struct CleanupTargets {
    pub tokens: SharedTokenStore,
    pub replay: Option<Arc<ReplayCache>>,
    pub exchange: Arc<ExchangeCodeStore>,
}

/// Runs the cleanup loop until the task is aborted.
pub async fn start_token_cleanup_worker(targets: CleanupTargets, config: JobsConfig) {
    if !config.cleanup_enabled {
        tracing::info!("Token cleanup worker disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.cleanup_interval_secs,
        "Starting token cleanup worker"
    );
    let interval = std::time::Duration::from_secs(config.cleanup_interval_secs);

    loop {
        tokio::time::sleep(interval).await;

        match run_cleanup(&targets, Utc::now()).await {
            Ok(result) if result.has_deletions() => {
                tracing::info!(
                    tokens = result.tokens_deleted,
                    replay_entries = result.replay_entries_deleted,
                    exchange_codes = result.exchange_codes_deleted,
                    duration_ms = result.duration_ms,
                    "Token cleanup run complete"
                );
            }
            Ok(_) => tracing::debug!("Token cleanup run complete, nothing to clean up"),
            Err(e) => tracing::error!(error = %e, "Error running token cleanup"),
        }
    }
}

/// A single pass. In-memory structures are swept even if the token store fails.
pub async fn run_cleanup(
    targets: &CleanupTargets,
    now: DateTime<Utc>,
) -> Result<CleanupRunResult, TokenStoreError> {
    let start = Instant::now();

    let replay_entries_deleted = targets
        .replay
        .as_ref()
        .map(|cache| cache.purge_expired(now))
        .unwrap_or_default();
    let exchange_codes_deleted = targets.exchange.purge_expired(now);
    let tokens_deleted = targets.tokens.purge_expired(now).await?;

    Ok(CleanupRunResult {
        tokens_deleted,
        replay_entries_deleted,
        exchange_codes_deleted,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::{
        auth::{MemoryTokenStore, SessionToken},
        models::{TokenKind, TokenRecord},
    };

    #[tokio::test]
    async fn test_run_cleanup_sweeps_everything() {
        let now = Utc::now();
        let tokens: SharedTokenStore = Arc::new(MemoryTokenStore::new());
        tokens
            .insert(TokenRecord {
                jti: Uuid::new_v4(),
                pair_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                kind: TokenKind::Access,
                issued_at: now - Duration::hours(2),
                expires_at: now - Duration::hours(1),
                revoked_at: None,
            })
            .await
            .unwrap();

        let replay = Arc::new(ReplayCache::new());
        replay.check_and_insert("_old", now - Duration::minutes(1), now - Duration::minutes(5));
        replay.check_and_insert("_live", now + Duration::minutes(5), now);

        let exchange = Arc::new(ExchangeCodeStore::new(0));
        exchange.issue(SessionToken {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: 60,
        });

        let targets = CleanupTargets {
            tokens,
            replay: Some(Arc::clone(&replay)),
            exchange,
        };
        let result = run_cleanup(&targets, now + Duration::seconds(1)).await.unwrap();

        assert_eq!(result.tokens_deleted, 1);
        assert_eq!(result.replay_entries_deleted, 1);
        assert_eq!(result.exchange_codes_deleted, 1);
        assert!(result.has_deletions());
        assert_eq!(replay.len(), 1);
    }
}
