//! Per-filename mutual exclusion.
//!
//! Operations on the same filename run one at a time; different filenames
//! proceed in parallel. The registry only holds weak references, so a lock
//! disappears once no operation holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct FilenameLocks {
    inner: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl FilenameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `filename`.
    pub async fn acquire(&self, filename: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(filename);
        lock.lock_owned().await
    }

    fn lock_for(&self, filename: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(lock) = map.get(filename).and_then(Weak::upgrade) {
            return lock;
        }
        map.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        map.insert(filename.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Number of live lock entries.
    pub fn len(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_filename_is_exclusive() {
        let locks = Arc::new(FilenameLocks::new());
        let guard = locks.acquire("a.txt").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("a.txt").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_filenames_do_not_block() {
        let locks = FilenameLocks::new();
        let _a = locks.acquire("a.txt").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire("b.txt")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_entries_are_dropped_after_use() {
        let locks = FilenameLocks::new();
        {
            let _g = locks.acquire("a.txt").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
