//! Expiry and capacity policy for cached reads.

use chrono::{DateTime, Duration, Utc};

use super::records::CacheEntry;
use super::storage::{DurableStore, StoreExt};
use super::traits::Collection;
use crate::config::CacheConfig;
use crate::error::OfflineError;

#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
  /// Entries older than this are never served and get pruned
  pub ttl: Duration,
  /// Oldest entries beyond this count are evicted
  pub max_entries: usize,
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self::from_config(&CacheConfig::default())
  }
}

impl CachePolicy {
  pub fn from_config(config: &CacheConfig) -> Self {
    Self {
      ttl: i64::try_from(config.ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX),
      max_entries: config.max_entries,
    }
  }

  pub fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
    now - entry.stored_at > self.ttl
  }

  /// Drop expired entries, then the oldest ones beyond capacity.
  /// Returns how many entries were removed.
  pub fn prune(&self, store: &dyn DurableStore, now: DateTime<Utc>) -> Result<usize, OfflineError> {
    // Sorted by stored_at, oldest first
    let entries = store.get_all::<CacheEntry>()?.decoded();
    let mut removed = 0;

    let (expired, live): (Vec<_>, Vec<_>) = entries
      .into_iter()
      .partition(|entry| self.is_expired(entry, now));

    for entry in &expired {
      store.delete(Collection::Cache, &entry.key)?;
      removed += 1;
    }

    let overflow = live.len().saturating_sub(self.max_entries);
    for entry in live.iter().take(overflow) {
      store.delete(Collection::Cache, &entry.key)?;
      removed += 1;
    }

    if removed > 0 {
      tracing::debug!(removed, "pruned cached reads");
    }
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Method;
  use crate::store::MemoryStore;
  use serde_json::json;

  fn entry(url: &str, age_minutes: i64) -> CacheEntry {
    let mut e = CacheEntry::new(Method::Get, url, json!({ "url": url }));
    e.stored_at = Utc::now() - Duration::minutes(age_minutes);
    e
  }

  #[test]
  fn test_huge_ttl_saturates_instead_of_expiring_everything() {
    let old = entry("ganado", 60 * 24 * 365 * 10);
    for ttl_secs in [u64::MAX, i64::MAX as u64, i64::MAX as u64 / 1000 + 1] {
      let policy = CachePolicy::from_config(&CacheConfig {
        ttl_secs,
        max_entries: 10,
      });
      assert_eq!(policy.ttl, Duration::MAX);
      assert!(!policy.is_expired(&old, Utc::now()));
    }

    let policy = CachePolicy::from_config(&CacheConfig {
      ttl_secs: 90,
      max_entries: 10,
    });
    assert_eq!(policy.ttl, Duration::seconds(90));
  }

  #[test]
  fn test_expired_entries_are_pruned() {
    let store = MemoryStore::new();
    let policy = CachePolicy {
      ttl: Duration::hours(1),
      max_entries: 10,
    };
    store.put(&entry("ganado", 120)).unwrap();
    store.put(&entry("leche", 5)).unwrap();

    assert_eq!(policy.prune(&store, Utc::now()).unwrap(), 1);
    let left = store.get_all::<CacheEntry>().unwrap().decoded();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].url, "leche");
  }

  #[test]
  fn test_capacity_evicts_oldest_first() {
    let store = MemoryStore::new();
    let policy = CachePolicy {
      ttl: Duration::days(1),
      max_entries: 2,
    };
    store.put(&entry("a", 30)).unwrap();
    store.put(&entry("b", 20)).unwrap();
    store.put(&entry("c", 10)).unwrap();

    assert_eq!(policy.prune(&store, Utc::now()).unwrap(), 1);
    let urls: Vec<String> = store
      .get_all::<CacheEntry>()
      .unwrap()
      .decoded()
      .into_iter()
      .map(|e| e.url)
      .collect();
    assert_eq!(urls, vec!["b", "c"]);
  }

  #[test]
  fn test_prune_leaves_mutations_alone() {
    let store = MemoryStore::new();
    let policy = CachePolicy {
      ttl: Duration::seconds(1),
      max_entries: 0,
    };
    store
      .put(&crate::store::PendingMutation::new(
        uuid::Uuid::new_v4(),
        Method::Post,
        "ganado",
        None,
      ))
      .unwrap();
    store.put(&entry("ganado", 60)).unwrap();
    policy.prune(&store, Utc::now()).unwrap();
    assert_eq!(store.count(Collection::Mutations).unwrap(), 1);
    assert_eq!(store.count(Collection::Cache).unwrap(), 0);
  }
}
