//! Session policy knobs and the clock the manager reads time from.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 960;
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: i32 = 6;
pub const DEFAULT_INDEX_RETRIES: u32 = 8;
pub const MIN_NONCE_LENGTH: usize = 16;

const CLINICIAN_ROLE_ID: i64 = 4;
const ACTIVE_CLINICIAN_LIST_KEY: &str = "active_clinician_list";

/// A side-cache key to evict whenever a session holding `role_id` is torn
/// down in bulk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvictionRule {
    pub role_id: i64,
    pub cache_key: String,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    session_ttl_seconds: u64,
    nonce_length: usize,
    index_retries: u32,
    eviction_rules: Vec<EvictionRule>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            nonce_length: MIN_NONCE_LENGTH,
            index_retries: DEFAULT_INDEX_RETRIES,
            eviction_rules: vec![EvictionRule {
                role_id: CLINICIAN_ROLE_ID,
                cache_key: ACTIVE_CLINICIAN_LIST_KEY.to_string(),
            }],
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds.max(1);
        self
    }

    /// Nonce length is never allowed below [`MIN_NONCE_LENGTH`].
    #[must_use]
    pub fn with_nonce_length(mut self, length: usize) -> Self {
        self.nonce_length = length.max(MIN_NONCE_LENGTH);
        self
    }

    #[must_use]
    pub fn with_index_retries(mut self, retries: u32) -> Self {
        self.index_retries = retries.max(1);
        self
    }

    #[must_use]
    pub fn with_eviction_rule(mut self, role_id: i64, cache_key: impl Into<String>) -> Self {
        self.eviction_rules.push(EvictionRule {
            role_id,
            cache_key: cache_key.into(),
        });
        self
    }

    #[must_use]
    pub fn without_eviction_rules(mut self) -> Self {
        self.eviction_rules.clear();
        self
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    #[must_use]
    pub fn nonce_length(&self) -> usize {
        self.nonce_length
    }

    #[must_use]
    pub fn index_retries(&self) -> u32 {
        self.index_retries
    }

    #[must_use]
    pub fn eviction_rules(&self) -> &[EvictionRule] {
        &self.eviction_rules
    }

    /// Cache keys to evict for a session holding `role_ids`.
    pub fn evictions_for<'a>(&'a self, role_ids: &'a [i64]) -> impl Iterator<Item = &'a str> {
        role_ids.iter().flat_map(move |role_id| {
            self.eviction_rules
                .iter()
                .filter(move |rule| rule.role_id == *role_id)
                .map(|rule| rule.cache_key.as_str())
        })
    }
}

/// Source of unix timestamps (seconds).
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
            })
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
