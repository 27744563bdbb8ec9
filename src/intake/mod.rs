//! Intake of user action payloads.
//!
//! An authenticated client posts a JSON document describing something the
//! user did. The document must be a JSON object or array; it is stored
//! verbatim under `actions/user_action_<YYYY-MM-DD_HH-MM-SS>.json` (UTC, whole
//! seconds) in an [`ActionSink`].

pub mod memory;
pub mod s3;

use crate::sessions::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

pub use self::memory::MemorySink;
pub use self::s3::{S3Sink, S3SinkConfig};

const KEY_FORMAT: &str = "actions/user_action_%Y-%m-%d_%H-%M-%S.json";

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("invalid JSON format: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid JSON: must be an object or array")]
    NotContainer,

    #[error("timestamp {0} cannot be formatted")]
    Timestamp(i64),

    #[error("failed to store {key}: {message}")]
    Sink { key: String, message: String },
}

impl IntakeError {
    /// The payload itself was rejected, as opposed to a storage failure.
    #[must_use]
    pub fn is_rejected_payload(&self) -> bool {
        matches!(self, Self::InvalidJson(_) | Self::NotContainer)
    }
}

/// Where accepted payloads end up.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn put(&self, key: &str, body: &[u8]) -> Result<(), IntakeError>;
}

/// Accept `body` only when its top level is a JSON object or array.
///
/// # Errors
/// Returns [`IntakeError::InvalidJson`] or [`IntakeError::NotContainer`].
pub fn validate_json(body: &[u8]) -> Result<(), IntakeError> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(_) | Value::Array(_) => Ok(()),
        _ => Err(IntakeError::NotContainer),
    }
}

/// Storage key for a payload received at `now` (unix seconds).
///
/// # Errors
/// Returns [`IntakeError::Timestamp`] when `now` is outside chrono's range.
pub fn action_key(now: i64) -> Result<String, IntakeError> {
    let at = DateTime::from_timestamp(now, 0).ok_or(IntakeError::Timestamp(now))?;
    Ok(at.format(KEY_FORMAT).to_string())
}

pub struct ActionIntake {
    sink: Arc<dyn ActionSink>,
    clock: Arc<dyn Clock>,
}

impl ActionIntake {
    #[must_use]
    pub fn new(sink: Arc<dyn ActionSink>) -> Self {
        Self {
            sink,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate and store a payload for `user_id`, returning its key.
    /// Payloads received within the same second share a key; the last one wins.
    ///
    /// # Errors
    /// Returns a rejected-payload error or the sink's failure.
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    pub async fn submit(&self, user_id: i64, body: &[u8]) -> Result<String, IntakeError> {
        validate_json(body)?;

        let key = action_key(self.clock.now())?;
        self.sink.put(&key, body).await?;

        info!(user_id, key = %key, "stored user action");
        Ok(key)
    }
}
