//! Per-namespace entry-count and age limits.
//!
//! Eviction is opportunistic: the strategy executor calls
//! [`ExpirationManager::enforce`] after each write that may have grown a
//! namespace. There is no background timer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::store::CacheStore;
use crate::Error;
use crate::config::NamespaceConfig;
use crate::model::EntryMeta;

/// Bounds for one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    pub max_entries: usize,
    pub max_age: Duration,
}

impl ExpirationPolicy {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self { max_entries, max_age }
    }

    /// Whether an entry stored at `stored_at` may still be served at `now`.
    pub fn is_fresh(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        now - stored_at <= max_age
    }
}

impl From<&NamespaceConfig> for ExpirationPolicy {
    fn from(cfg: &NamespaceConfig) -> Self {
        Self::new(cfg.max_entries, cfg.max_age())
    }
}

/// Keys to evict from `entries` (oldest write first) so that the remainder
/// satisfies `policy` at `now`.
///
/// Age-expired entries go first; then the oldest survivors until at most
/// `max_entries` remain.
pub fn select_victims(entries: &[EntryMeta], policy: &ExpirationPolicy, now: DateTime<Utc>) -> Vec<String> {
    let (fresh, mut victims): (Vec<&EntryMeta>, Vec<&EntryMeta>) =
        entries.iter().partition(|m| policy.is_fresh(m.stored_at, now));

    let excess = fresh.len().saturating_sub(policy.max_entries);
    victims.extend(fresh.into_iter().take(excess));

    victims.into_iter().map(|m| m.key.clone()).collect()
}

/// Applies [`ExpirationPolicy`] to namespaces of a [`CacheStore`].
pub struct ExpirationManager {
    store: Arc<dyn CacheStore>,
    // Serializes read-select-delete so two writers never evict from a stale listing.
    lock: Mutex<()>,
}

impl ExpirationManager {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store, lock: Mutex::new(()) }
    }

    /// Bring `namespace` within `policy`. Returns the number of evicted entries.
    ///
    /// Idempotent: a namespace already within bounds is left untouched.
    pub async fn enforce(
        &self, namespace: &str, policy: &ExpirationPolicy, now: DateTime<Utc>,
    ) -> Result<usize, Error> {
        let _guard = self.lock.lock().await;

        let entries = self.store.entries(namespace).await?;
        let victims = select_victims(&entries, policy, now);

        let mut evicted = 0;
        for key in &victims {
            if self.store.delete(namespace, key).await? {
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(namespace, evicted, remaining = entries.len() - evicted, "evicted cache entries");
        }

        Ok(evicted)
    }
}
