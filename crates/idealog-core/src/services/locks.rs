//! Per-owner mutual exclusion

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::OwnerId;

/// Token held while mutating one owner's data.
pub type OwnerGuard = OwnedMutexGuard<()>;

/// One async mutex per owner, created on first use.
///
/// Entries nobody holds or waits on are dropped on the next acquisition.
/// Mutations of different owners proceed in parallel; mutations of the same
/// owner are serialized in arrival order.
#[derive(Clone, Default)]
pub struct OwnerLocks {
    locks: Arc<Mutex<HashMap<OwnerId, Arc<AsyncMutex<()>>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to an owner's data.
    pub async fn acquire(&self, owner: &OwnerId) -> OwnerGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Only the map references an idle lock
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(owner.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn same_owner_is_serialized() {
        let locks = OwnerLocks::new();
        let owner = OwnerId::new("user-1").unwrap();

        let guard = locks.acquire(&owner).await;
        let waiting = {
            let locks = locks.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&owner).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn idle_owner_locks_are_pruned() {
        let locks = OwnerLocks::new();
        for name in ["a", "b", "c"] {
            let _guard = locks.acquire(&OwnerId::new(name).unwrap()).await;
        }
        let _held = locks.acquire(&OwnerId::new("d").unwrap()).await;
        let _other = locks.acquire(&OwnerId::new("e").unwrap()).await;

        let owners = locks.locks.lock().unwrap().len();
        assert_eq!(owners, 2);
    }

    #[tokio::test]
    async fn different_owners_do_not_block() {
        let locks = OwnerLocks::new();
        let _first = locks.acquire(&OwnerId::new("a").unwrap()).await;
        let _second = locks.acquire(&OwnerId::new("b").unwrap()).await;
    }
}
