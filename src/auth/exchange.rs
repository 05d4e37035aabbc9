use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;

use super::tokens::SessionToken;

const CODE_BYTES: usize = 32;

struct PendingExchange {
    session: SessionToken,
    expires_at: DateTime<Utc>,
}

/// One-time codes standing in for a token pair on the browser redirect.
///
/// A code is removed on its first redemption attempt, so it can be
/// redeemed at most once even under concurrent requests.
pub struct ExchangeCodeStore {
    pending: DashMap<String, PendingExchange>,
    ttl: Duration,
}

impl ExchangeCodeStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            pending: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Park `session` and return the code that redeems it.
    pub fn issue(&self, session: SessionToken) -> String {
        let mut bytes = [0u8; CODE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let code = URL_SAFE_NO_PAD.encode(bytes);
        self.pending.insert(
            code.clone(),
            PendingExchange {
                session,
                expires_at: Utc::now() + self.ttl,
            },
        );
        code
    }

    /// Take the session behind `code`, if it exists and has not expired.
    pub fn redeem(&self, code: &str) -> Option<SessionToken> {
        let (_, pending) = self.pending.remove(code)?;
        if pending.expires_at < Utc::now() {
            tracing::debug!("Exchange code expired before redemption");
            return None;
        }
        Some(pending.session)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| p.expires_at >= now);
        before.saturating_sub(self.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionToken {
        SessionToken {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_in: 60,
        }
    }

    #[test]
    fn test_code_redeems_once() {
        let store = ExchangeCodeStore::new(60);
        let code = store.issue(session());

        let redeemed = store.redeem(&code).unwrap();
        assert_eq!(redeemed.access_token, "access");
        assert!(store.redeem(&code).is_none());
        assert!(store.redeem("unknown").is_none());
    }

    #[test]
    fn test_codes_are_unique() {
        let store = ExchangeCodeStore::new(60);
        assert_ne!(store.issue(session()), store.issue(session()));
    }

    #[test]
    fn test_expired_code_rejected_and_purged() {
        let store = ExchangeCodeStore::new(0);
        let code = store.issue(session());
        let later = Utc::now() + Duration::seconds(1);

        assert_eq!(store.purge_expired(later), 1);
        assert!(store.redeem(&code).is_none());
    }
}
