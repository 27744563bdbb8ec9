//! Session records stored under their token with a TTL.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::error::SessionError;
use crate::store::KeyValueStore;

/// A live session as stored in the key-value store.
///
/// `token` is the key, so it is not part of the stored JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(skip)]
    pub token: String,
    pub user_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: BTreeMap<String, String>,
    pub created: i64,
    pub timeout: u64,
}

/// Treat an explicit JSON `null` like a missing field.
pub(super) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Session {
    /// Numeric role ids, in role-map order.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidRoleId`] if a role key is not an integer.
    pub fn role_ids(&self) -> Result<Vec<i64>, SessionError> {
        self.roles
            .keys()
            .map(|role_id| {
                role_id
                    .parse::<i64>()
                    .map_err(|_| SessionError::InvalidRoleId(role_id.clone()))
            })
            .collect()
    }
}

pub struct SessionRecordStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionRecordStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Load the session stored under `token`.
    ///
    /// Returns `Ok(None)` when the key is missing or expired.
    ///
    /// # Errors
    /// Returns an error on store failure or if the stored JSON is malformed.
    #[instrument(skip(self, token))]
    pub async fn load(&self, token: &str) -> Result<Option<Session>, SessionError> {
        let Some(bytes) = self.kv.get(token).await? else {
            debug!("session not found");
            return Ok(None);
        };
        let mut session: Session =
            serde_json::from_slice(&bytes).map_err(|e| SessionError::malformed(token, e))?;
        session.token = token.to_string();
        Ok(Some(session))
    }

    /// Store a new session; fails with [`SessionError::NonUniqueToken`] if
    /// `token` is already taken.
    ///
    /// # Errors
    /// Returns an error on collision or store failure.
    #[instrument(skip(self, token, session), fields(user_id = session.user_id))]
    pub async fn insert(&self, token: &str, session: &Session) -> Result<(), SessionError> {
        let body = serde_json::to_vec(session).map_err(SessionError::Serialize)?;
        if self.kv.set_if_absent(token, &body, self.ttl).await? {
            Ok(())
        } else {
            Err(SessionError::NonUniqueToken)
        }
    }

    /// Overwrite the session under `token`, resetting its TTL.
    ///
    /// # Errors
    /// Returns an error on store failure.
    #[instrument(skip(self, token, session), fields(user_id = session.user_id))]
    pub async fn rewrite(&self, token: &str, session: &Session) -> Result<(), SessionError> {
        let body = serde_json::to_vec(session).map_err(SessionError::Serialize)?;
        self.kv.set_with_ttl(token, &body, self.ttl).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error on store failure.
    pub async fn delete(&self, token: &str) -> Result<(), SessionError> {
        self.kv.delete(token).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error on store failure.
    pub async fn exists(&self, token: &str) -> Result<bool, SessionError> {
        Ok(self.kv.exists(token).await?)
    }
}
