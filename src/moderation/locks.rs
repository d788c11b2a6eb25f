//! Per-(chat, user) serialization.
//!
//! Inbound update handling and timer fires both mutate state keyed by
//! (chat, user); this table hands out one async mutex per key so those
//! mutations serialize per key while unrelated keys proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of per-key async mutexes.
pub struct KeyedLocks {
    locks: DashMap<(i64, i64), Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire the lock for a (chat, user) key, creating it on first use.
    pub async fn acquire(&self, chat_id: i64, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry((chat_id, user_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop unheld locks so the table doesn't grow with every user ever seen.
    pub fn sweep(&self) -> usize {
        let before = self.locks.len();
        // strong_count == 1 means only the table holds the lock.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());

        let guard = locks.acquire(1, 2).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(1, 2).await;
            })
        };

        // The contender cannot finish while we hold the guard.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_drops_unheld_locks() {
        let locks = KeyedLocks::new();
        drop(locks.acquire(1, 2).await);
        drop(locks.acquire(3, 4).await);
        assert_eq!(locks.len(), 2);

        let held = locks.acquire(5, 6).await;
        assert_eq!(locks.sweep(), 2);
        assert_eq!(locks.len(), 1);
        drop(held);
    }
}
