//! Query cache
//!
//! Memoizes derived reads (pages, counts, single records, pending sets) for a
//! fixed time-to-live. Entries are tagged with their owner so that any write
//! for that owner can drop every dependent entry at once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::models::{Collection, OwnerId};

/// Kind of derived read an entry memoizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Page(Collection),
    Count(Collection),
    Record(Collection),
    PendingSync,
}

/// Key of a cache entry: what was asked, for whom, with which parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: QueryKind,
    pub owner: OwnerId,
    pub params: String,
}

impl CacheKey {
    pub fn new(kind: QueryKind, owner: &OwnerId, params: impl Into<String>) -> Self {
        Self {
            kind,
            owner: owner.clone(),
            params: params.into(),
        }
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct CacheState<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    by_owner: HashMap<OwnerId, HashSet<CacheKey>>,
}

impl<V> CacheState<V> {
    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        if let Some(keys) = self.by_owner.get_mut(&key.owner) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_owner.remove(&key.owner);
            }
        }
    }
}

/// Time-bounded memo of query results.
pub struct QueryCache<V> {
    ttl: Duration,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> QueryCache<V> {
    /// Create a cache whose entries live for `ttl`. A zero `ttl` disables it.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                by_owner: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cached value, if present and not expired.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut state = self.lock();
        let now = Instant::now();
        let expired = match state.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            state.remove(key);
        }
        None
    }

    pub fn insert(&self, key: CacheKey, value: V) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.lock();
        state
            .by_owner
            .entry(key.owner.clone())
            .or_default()
            .insert(key.clone());
        state.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every entry derived from an owner's data.
    pub fn invalidate_owner(&self, owner: &OwnerId) -> usize {
        let mut state = self.lock();
        let Some(keys) = state.by_owner.remove(owner) else {
            return 0;
        };
        for key in &keys {
            state.entries.remove(key);
        }
        keys.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.by_owner.clear();
    }

    /// Remove expired entries and return how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.lock();
        let now = Instant::now();
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background task periodically sweeping expired cache entries.
pub struct CacheSweeper {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CacheSweeper {
    /// Start sweeping `cache` every `interval`. Must be called inside a tokio runtime.
    pub fn spawn<V>(cache: Arc<QueryCache<V>>, interval: Duration) -> Self
    where
        V: Clone + Send + 'static,
    {
        let (shutdown, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = cache.sweep_expired();
                        if swept > 0 {
                            tracing::debug!("Swept {swept} expired cache entries");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });
        Self { shutdown, task }
    }

    /// Stop the sweep and wait for the task to finish.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(error) = self.task.await {
            tracing::warn!("Cache sweeper ended abnormally: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn owner(id: &str) -> OwnerId {
        OwnerId::new(id).unwrap()
    }

    fn page_key(owner_id: &str, params: &str) -> CacheKey {
        CacheKey::new(QueryKind::Page(Collection::Ideas), &owner(owner_id), params)
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = QueryCache::new(Duration::from_secs(300));
        cache.insert(page_key("a", "p1"), 1);
        assert_eq!(cache.get(&page_key("a", "p1")), Some(1));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get(&page_key("a", "p1")), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_is_scoped_to_owner() {
        let cache = QueryCache::new(Duration::from_secs(300));
        cache.insert(page_key("a", "p1"), 1);
        cache.insert(
            CacheKey::new(QueryKind::Count(Collection::Drafts), &owner("a"), ""),
            2,
        );
        cache.insert(page_key("b", "p1"), 3);

        assert_eq!(cache.invalidate_owner(&owner("a")), 2);
        assert_eq!(cache.get(&page_key("a", "p1")), None);
        assert_eq!(cache.get(&page_key("b", "p1")), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_disables_cache() {
        let cache = QueryCache::new(Duration::ZERO);
        cache.insert(page_key("a", "p1"), 1);
        assert_eq!(cache.get(&page_key("a", "p1")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_drops_expired_entries() {
        let cache = Arc::new(QueryCache::new(Duration::from_secs(60)));
        cache.insert(page_key("a", "p1"), 1);
        let sweeper = CacheSweeper::spawn(Arc::clone(&cache), Duration::from_secs(600));

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(cache.len(), 0);

        sweeper.shutdown().await;
    }
}
