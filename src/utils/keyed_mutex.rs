use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A mutex that allows locking based on a key (e.g., an artifact key).
/// Publishing two uploads of the same content waits instead of racing.
#[derive(Debug, Clone)]
pub struct KeyedMutex {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Acquires a lock for the given key.
    /// The lock is released when the returned guard is dropped.
    pub async fn lock(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        mutex.lock_owned().await
    }

    /// Removes locks that are not currently held by any task.
    pub fn cleanup(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedMutex::new();
        let guard = locks.lock("abc").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock("abc").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedMutex::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_entries() {
        let locks = KeyedMutex::new();
        {
            let _g = locks.lock("idle").await;
        }
        let _held = locks.lock("held").await;
        locks.cleanup();
        assert_eq!(locks.len(), 1);
    }
}
