//! In-process [`KeyValueStore`] with TTL eviction on read.
//!
//! Expiry uses `tokio::time::Instant`, so tests running with paused time can
//! drive it with `tokio::time::advance`.

use super::{KeyValueStore, Replacement, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn new(value: &[u8], ttl: Duration) -> Self {
        Self {
            value: value.to_vec(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of `key`, `None` if absent or expired.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.expires_at - Instant::now())
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.is_live()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(Entry::is_live) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        replacement: Replacement<'_>,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.as_slice());

        if current != expected {
            return Ok(false);
        }

        match replacement {
            Replacement::Set { value, ttl } => {
                entries.insert(key.to_string(), Entry::new(value, ttl));
            }
            Replacement::Delete => {
                entries.remove(key);
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).is_some_and(Entry::is_live))
    }
}
