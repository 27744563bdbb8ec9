//! Per-user list of live session tokens, keyed by the user hash.
//!
//! The list is rewritten as a whole on every change. Writes go through
//! compare-and-swap against the bytes that were read, and a lost race is
//! retried from a fresh read, so concurrent logins and logouts for the same
//! user do not overwrite each other.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::error::SessionError;
use super::records::null_as_default;
use crate::store::{KeyValueStore, Replacement};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSession {
    #[serde(alias = "Token")]
    pub token: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles_list: Vec<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(alias = "UserIDHash", default)]
    pub user_id_hash: String,
    #[serde(alias = "Sessions", default, deserialize_with = "null_as_default")]
    pub sessions: Vec<IndexedSession>,
}

impl IndexEntry {
    #[must_use]
    pub fn new(user_id_hash: &str) -> Self {
        Self {
            user_id_hash: user_id_hash.to_string(),
            sessions: Vec::new(),
        }
    }

    /// Swap-remove `token`; order of the remaining sessions is not kept.
    pub fn remove_token(&mut self, token: &str) -> bool {
        match self.sessions.iter().position(|s| s.token == token) {
            Some(pos) => {
                self.sessions.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.token.as_str()).collect()
    }
}

/// An entry together with the raw bytes it was decoded from.
#[derive(Clone, Debug)]
pub struct VersionedEntry {
    pub entry: IndexEntry,
    version: Vec<u8>,
}

pub struct UserSessionIndex {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
    retries: u32,
}

impl UserSessionIndex {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration, retries: u32) -> Self {
        Self {
            kv,
            ttl,
            retries: retries.max(1),
        }
    }

    /// # Errors
    /// Returns an error on store failure or malformed JSON.
    #[instrument(skip(self))]
    pub async fn read_entry(
        &self,
        user_hash: &str,
    ) -> Result<Option<VersionedEntry>, SessionError> {
        let Some(version) = self.kv.get(user_hash).await? else {
            return Ok(None);
        };
        let mut entry: IndexEntry =
            serde_json::from_slice(&version).map_err(|e| SessionError::malformed(user_hash, e))?;
        if entry.user_id_hash.is_empty() {
            entry.user_id_hash = user_hash.to_string();
        }
        Ok(Some(VersionedEntry { entry, version }))
    }

    /// Write `entry` only if the stored value is still `expected`. An entry
    /// with no sessions deletes the key instead.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn compare_and_swap(
        &self,
        user_hash: &str,
        expected: Option<&VersionedEntry>,
        entry: &IndexEntry,
    ) -> Result<bool, SessionError> {
        let expected = expected.map(|v| v.version.as_slice());
        if entry.sessions.is_empty() {
            return Ok(self
                .kv
                .compare_and_swap(user_hash, expected, Replacement::Delete)
                .await?);
        }
        let body = serde_json::to_vec(entry).map_err(SessionError::Serialize)?;
        let replacement = Replacement::Set {
            value: &body,
            ttl: self.ttl,
        };
        Ok(self
            .kv
            .compare_and_swap(user_hash, expected, replacement)
            .await?)
    }

    /// Read, mutate and write back the entry for `user_hash`, retrying on
    /// concurrent modification. `mutate` returns `false` to skip the write.
    async fn update<F>(&self, user_hash: &str, mut mutate: F) -> Result<bool, SessionError>
    where
        F: FnMut(&mut IndexEntry) -> bool + Send,
    {
        for attempt in 1..=self.retries {
            let current = self.read_entry(user_hash).await?;
            let mut entry = current
                .as_ref()
                .map_or_else(|| IndexEntry::new(user_hash), |v| v.entry.clone());

            if !mutate(&mut entry) {
                return Ok(false);
            }

            if self
                .compare_and_swap(user_hash, current.as_ref(), &entry)
                .await?
            {
                return Ok(true);
            }

            warn!(attempt, "session index changed concurrently, retrying");
        }

        Err(SessionError::IndexContention {
            user_hash: user_hash.to_string(),
            attempts: self.retries,
        })
    }

    /// Add a session to the entry, creating it if needed, and refresh the TTL.
    ///
    /// # Errors
    /// Returns an error on store failure or when retries run out.
    #[instrument(skip(self, session))]
    pub async fn append(
        &self,
        user_hash: &str,
        session: IndexedSession,
    ) -> Result<(), SessionError> {
        self.update(user_hash, |entry| {
            entry.sessions.push(session.clone());
            true
        })
        .await?;
        debug!("session added to index");
        Ok(())
    }

    /// Remove `token` from the entry; the key is deleted once the list is
    /// empty. Returns whether the token was present.
    ///
    /// # Errors
    /// Returns an error on store failure or when retries run out.
    #[instrument(skip(self, token))]
    pub async fn remove(&self, user_hash: &str, token: &str) -> Result<bool, SessionError> {
        self.update(user_hash, |entry| entry.remove_token(token))
            .await
    }

    /// # Errors
    /// Returns an error on store failure.
    pub async fn delete(&self, user_hash: &str) -> Result<(), SessionError> {
        self.kv.delete(user_hash).await?;
        Ok(())
    }
}
