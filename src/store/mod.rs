//! Key-value collaborator used for session records and per-user indexes.
//!
//! Every key written through this trait carries a TTL; expiry is enforced by
//! the backend, so callers must treat a missing key as a normal outcome.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("unexpected reply from store: {0}")]
    UnexpectedReply(String),
}

/// What `compare_and_swap` writes when the expectation holds.
#[derive(Debug, Clone, Copy)]
pub enum Replacement<'a> {
    Set { value: &'a [u8], ttl: Duration },
    Delete,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration)
        -> Result<(), StoreError>;

    /// Write only when `key` does not exist. Returns `false` if it did.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Apply `replacement` only if the stored value still equals `expected`
    /// (`None` meaning the key must be absent). Returns `false` on mismatch.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        replacement: Replacement<'_>,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// Whole seconds for a TTL, never less than one so the key always expires.
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
