//! # Tessera (ephemeral sessions)
//!
//! `tessera` issues, refreshes and revokes short-lived login sessions for a
//! multi-tenant application. Users and roles live in `PostgreSQL`; sessions
//! live in Redis with a TTL and disappear on their own when idle.
//!
//! ## Keys
//!
//! - `<token>`: the session record (`user_id`, `roles`, `created`, `timeout`).
//! - `<user hash>`: every live token of one user, so a password reset or a
//!   "log out everywhere" can revoke them together.
//!
//! Both keys share the session TTL (960 seconds unless configured otherwise).
//!
//! ## Lockout
//!
//! Each wrong password increments `users.failed_logins`. At the configured
//! limit (6 by default) the account gets the locked-by-failed-login status bit,
//! which only an administrator clears.

pub mod api;
pub mod cli;
pub mod intake;
pub mod sessions;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

/// First seven characters of a commit hash, trimmed.
#[must_use]
pub fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
