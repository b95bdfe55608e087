//! # Keyed Lanes
//!
//! One async mutex per key. Work for the same key runs strictly one at a time,
//! work for different keys runs in parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub type LaneGuard = OwnedMutexGuard<()>;

pub struct KeyedLocks<K> {
    lanes: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lane of `key` and holds it until the guard is dropped.
    pub async fn lock(&self, key: &K) -> LaneGuard {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(lanes.entry(key.clone()).or_default())
        };
        lane.lock_owned().await
    }

    /// Forgets lanes nobody holds or waits on. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        let before = lanes.len();
        lanes.retain(|_, lane| Arc::strong_count(lane) > 1);
        before - lanes.len()
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&"alice".to_string()).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_run_in_parallel() {
        let locks = KeyedLocks::<String>::new();
        let _a = locks.lock(&"alice".to_string()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&"bob".to_string())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_lanes() {
        let locks = KeyedLocks::<String>::new();
        let held = locks.lock(&"alice".to_string()).await;
        drop(locks.lock(&"bob".to_string()).await);
        assert_eq!(locks.len(), 2);
        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 0);
    }
}
