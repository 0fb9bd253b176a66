use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Maps a normalized query key to the column labels already resident for
/// that query, and coalesces concurrent fetches of the same key.
///
/// Issuing the same query twice while the first is outstanding must not
/// issue a second network fetch: the second caller blocks on the per-key
/// guard, re-checks residency once the first caller has merged its result,
/// and returns the shared data.
pub struct WhereCache {
    resident: RwLock<AHashMap<String, Vec<String>>>,
    inflight: Mutex<AHashMap<String, Arc<Mutex<()>>>>,
}

impl WhereCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            resident: RwLock::new(AHashMap::new()),
            inflight: Mutex::new(AHashMap::new()),
        }
    }

    /// Column labels resident for `key`, if the query has been satisfied.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Vec<String>> {
        self.resident.read().get(key).cloned()
    }

    /// Record the column labels fetched for `key`. Called before the
    /// coalescing guard is released so awaiting callers observe the update.
    pub fn insert(&self, key: &str, columns: Vec<String>) {
        self.resident.write().insert(key.to_string(), columns);
    }

    /// Serialize fetches of one key. Holding the returned guard marks the
    /// query as in-flight; drop it after the cache has been updated.
    pub async fn guard(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Copy of the resident map, for clone-style view construction.
    #[must_use]
    pub fn clone_resident(&self) -> WhereCache {
        WhereCache {
            resident: RwLock::new(self.resident.read().clone()),
            inflight: Mutex::new(AHashMap::new()),
        }
    }
}

impl Default for WhereCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_after_insert() {
        let cache = WhereCache::new();
        assert!(cache.lookup("obs/louvain").is_none());
        cache.insert("obs/louvain", vec!["louvain".to_string()]);
        assert_eq!(
            cache.lookup("obs/louvain"),
            Some(vec!["louvain".to_string()])
        );
    }

    #[tokio::test]
    async fn test_guard_serializes_same_key() {
        let cache = Arc::new(WhereCache::new());
        let guard = cache.guard("k").await;

        let contender = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let _g = cache.guard("k").await;
                cache.lookup("k")
            })
        };

        // Simulate the first fetch completing: update, then release.
        cache.insert("k", vec!["col".to_string()]);
        drop(guard);

        let seen = contender.await.unwrap();
        assert_eq!(seen, Some(vec!["col".to_string()]));
    }
}
