/// Pending-Delete Store
///
/// Holds DELETE row images that may still be paired with a following INSERT
/// carrying the same record identity and commit timestamp.
///
/// # Guarantees
/// - Keyed by (table, record identity); tables never collide
/// - Every removal is an atomic check-and-remove: the caller that gets the
///   entry back owns the outcome, everyone else observes absence
/// - Stale entries are purged by [`PendingDeleteStore::purge_stale`]
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::models::{CommitTimestamp, MessageKey, RowImage};
use super::scheduler::TaskId;

/// Composite identity key, rendered as `table_recordId`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub table: String,
    pub record_id: String,
}

impl PendingKey {
    pub fn new(table: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            record_id: record_id.into(),
        }
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.table, self.record_id)
    }
}

/// A captured DELETE awaiting correlation
#[derive(Debug, Clone)]
pub struct PendingDelete {
    pub commit_ts: CommitTimestamp,
    /// When the DELETE was captured
    pub captured_at: Instant,
    pub old_data: RowImage,
    pub schema: Option<String>,
    pub partition: i32,
    pub offset: i64,
    pub message_key: Option<MessageKey>,
    /// Deferred finalize task owning the standalone-DELETE emission
    pub finalize_task: Option<TaskId>,
}

impl PendingDelete {
    fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) > threshold
    }
}

#[derive(Debug, Default)]
pub struct PendingDeleteStore {
    entries: HashMap<PendingKey, PendingDelete>,
}

impl PendingDeleteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pending delete, returning the entry it replaced
    pub fn insert(&mut self, key: PendingKey, pending: PendingDelete) -> Option<PendingDelete> {
        self.entries.insert(key, pending)
    }

    pub fn get_mut(&mut self, key: &PendingKey) -> Option<&mut PendingDelete> {
        self.entries.get_mut(key)
    }

    /// Remove the entry only if it still carries `commit_ts`
    pub fn claim(
        &mut self,
        key: &PendingKey,
        commit_ts: &CommitTimestamp,
    ) -> Option<PendingDelete> {
        if self.entries.get(key)?.commit_ts != *commit_ts {
            return None;
        }
        self.entries.remove(key)
    }

    /// Remove every entry captured longer than `threshold` ago.
    ///
    /// Returns the removed entries so their timers can be cancelled; the
    /// entries themselves are discarded without emission.
    pub fn purge_stale(
        &mut self,
        now: Instant,
        threshold: Duration,
    ) -> Vec<(PendingKey, PendingDelete)> {
        let stale_keys: Vec<PendingKey> = self
            .entries
            .iter()
            .filter(|(_, pending)| pending.is_stale(now, threshold))
            .map(|(key, _)| key.clone())
            .collect();

        let removed: Vec<(PendingKey, PendingDelete)> = stale_keys
            .into_iter()
            .filter_map(|key| self.entries.remove_entry(&key))
            .collect();

        for (key, pending) in &removed {
            debug!(
                key = %key,
                commit_ts = %pending.commit_ts,
                "Discarding stale pending delete"
            );
        }
        if !removed.is_empty() {
            info!(
                removed = removed.len(),
                remaining = self.entries.len(),
                "Cleaned up stale pending deletes"
            );
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(ts: i64, captured_at: Instant) -> PendingDelete {
        PendingDelete {
            commit_ts: CommitTimestamp::from(ts),
            captured_at,
            old_data: json!({"id": 1}).as_object().cloned().unwrap(),
            schema: None,
            partition: 0,
            offset: 0,
            message_key: None,
            finalize_task: None,
        }
    }

    #[test]
    fn test_key_format() {
        assert_eq!(PendingKey::new("users", "42").to_string(), "users_42");
    }

    #[test]
    fn test_tables_do_not_collide() {
        let now = Instant::now();
        let mut store = PendingDeleteStore::new();
        store.insert(PendingKey::new("users", "1"), pending(1, now));
        store.insert(PendingKey::new("orders", "1"), pending(2, now));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_claim_requires_matching_timestamp() {
        let now = Instant::now();
        let key = PendingKey::new("users", "1");
        let mut store = PendingDeleteStore::new();
        store.insert(key.clone(), pending(10, now));

        assert!(store.claim(&key, &CommitTimestamp::from(11)).is_none());
        assert_eq!(store.len(), 1);

        let claimed = store.claim(&key, &CommitTimestamp::from(10));
        assert!(claimed.is_some());
        assert!(store.is_empty());

        // Second claimant observes absence
        assert!(store.claim(&key, &CommitTimestamp::from(10)).is_none());
    }

    #[test]
    fn test_purge_stale_partial() {
        let base = Instant::now();
        let mut store = PendingDeleteStore::new();
        store.insert(PendingKey::new("users", "old"), pending(1, base));
        store.insert(
            PendingKey::new("users", "fresh"),
            pending(2, base + Duration::from_secs(4)),
        );

        let removed = store.purge_stale(base + Duration::from_secs(6), Duration::from_secs(5));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, PendingKey::new("users", "old"));
        assert_eq!(store.len(), 1);
        assert!(store.get_mut(&PendingKey::new("users", "fresh")).is_some());
    }
}
