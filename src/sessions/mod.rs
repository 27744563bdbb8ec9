//! Ephemeral session lifecycle.
//!
//! A login checks the credential database, mints an HS256 token and writes
//! two kinds of keys to the key-value store:
//!
//! - the session record, keyed by the token, expiring after the session TTL;
//! - the user's index entry, keyed by a hash of the user id and account
//!   creation time, listing every live token so all of a user's sessions can
//!   be revoked at once (logout everywhere, password reset).
//!
//! Session start and explicit logout are also written to an audit table.
//! Expired sessions are not reported there.

pub mod audit;
pub mod config;
pub mod credentials;
pub mod error;
pub mod index;
pub mod manager;
pub mod memory;
pub mod password;
pub mod records;
pub mod token;

pub use self::audit::{AuditTrail, PgAuditTrail};
pub use self::config::{Clock, SessionConfig, SystemClock};
pub use self::credentials::{CredentialStore, PgCredentialStore};
pub use self::error::{ErrorKind, SessionError};
pub use self::manager::{LoginRequest, SessionContext, SessionManager};
pub use self::memory::{MemoryAuditTrail, MemoryCredentials};
pub use self::records::Session;
pub use self::token::{Hs256Signer, TokenSigner};
