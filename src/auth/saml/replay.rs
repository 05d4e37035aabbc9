use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};

/// Assertion IDs already consumed, each kept until the assertion itself
/// could no longer be accepted.
#[derive(Debug, Default)]
pub struct ReplayCache {
    seen: DashMap<String, DateTime<Utc>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as used until `keep_until`.
    ///
    /// Returns `false` if the ID was already recorded and is still live.
    /// The check and insert happen under one shard lock, so of two
    /// concurrent callers with the same ID exactly one wins.
    pub fn check_and_insert(&self, id: &str, keep_until: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.seen.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() >= now {
                    return false;
                }
                entry.insert(keep_until);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(keep_until);
                true
            }
        }
    }

    /// Drop entries that have lapsed. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, keep_until| *keep_until >= now);
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
