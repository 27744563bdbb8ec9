use crate::store::StoreError;
use thiserror::Error;

use super::password::PasswordPolicy;

/// Coarse classification of a [`SessionError`], stable for callers that map
/// failures onto transport responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserNotFound,
    UserLocked,
    PasswordMismatch,
    NonUniqueToken,
    SessionNotFound,
    MalformedRecord,
    WeakPassword,
    Hash,
    Token,
    IndexContention,
    Store,
    Database,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("user not found")]
    UserNotFound,

    #[error("account is locked")]
    UserLocked,

    #[error("password is incorrect")]
    PasswordMismatch,

    #[error("generated token was not unique")]
    NonUniqueToken,

    #[error("session not found")]
    SessionNotFound,

    #[error("malformed record under key {key}")]
    MalformedRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid role id: {0}")]
    InvalidRoleId(String),

    #[error("password rejected: {0}")]
    WeakPassword(#[from] PasswordPolicy),

    #[error("password hash failed: {0}")]
    Hash(String),

    #[error("session token error")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("failed to serialize record")]
    Serialize(#[source] serde_json::Error),

    #[error("session index for {user_hash} kept changing, gave up after {attempts} attempts")]
    IndexContention { user_hash: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl SessionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound => ErrorKind::UserNotFound,
            Self::UserLocked => ErrorKind::UserLocked,
            Self::PasswordMismatch => ErrorKind::PasswordMismatch,
            Self::NonUniqueToken => ErrorKind::NonUniqueToken,
            Self::SessionNotFound => ErrorKind::SessionNotFound,
            Self::MalformedRecord { .. } | Self::InvalidRoleId(_) | Self::Serialize(_) => {
                ErrorKind::MalformedRecord
            }
            Self::WeakPassword(_) => ErrorKind::WeakPassword,
            Self::Hash(_) => ErrorKind::Hash,
            Self::Token(_) => ErrorKind::Token,
            Self::IndexContention { .. } => ErrorKind::IndexContention,
            Self::Store(_) => ErrorKind::Store,
            Self::Database(_) => ErrorKind::Database,
        }
    }

    pub(crate) fn malformed(key: &str, source: serde_json::Error) -> Self {
        Self::MalformedRecord {
            key: key.to_string(),
            source,
        }
    }
}
