//! Identity lookup and login-attempt bookkeeping.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tracing::{info, Instrument};

use super::config::DEFAULT_MAX_LOGIN_ATTEMPTS;
use super::error::SessionError;

/// Bitmask stored in `users.status`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserStatus(pub i32);

impl UserStatus {
    pub const DELETED: i32 = 2;
    pub const LOCKED: i32 = 4;
    pub const LOCKED_BY_FAILED_LOGIN: i32 = 16;

    #[must_use]
    pub fn is_deleted(self) -> bool {
        self.0 & Self::DELETED != 0
    }

    #[must_use]
    pub fn is_locked(self) -> bool {
        self.0 & (Self::LOCKED | Self::LOCKED_BY_FAILED_LOGIN) != 0
    }

    #[must_use]
    pub fn with(self, bit: i32) -> Self {
        Self(self.0 | bit)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub status: UserStatus,
    pub password_hash: String,
    pub created: i64,
    pub failed_logins: i32,
}

/// Reject deleted or locked identities.
///
/// Deleted users are reported as not found so callers cannot tell the two
/// apart.
///
/// # Errors
/// Returns [`SessionError::UserNotFound`] or [`SessionError::UserLocked`].
pub fn validate_status(identity: &Identity) -> Result<(), SessionError> {
    if identity.status.is_deleted() {
        return Err(SessionError::UserNotFound);
    }
    if identity.status.is_locked() {
        return Err(SessionError::UserLocked);
    }
    Ok(())
}

/// Failed-login counter and status after one more login attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoginAttempts {
    pub failed_logins: i32,
    pub status: UserStatus,
}

impl LoginAttempts {
    /// Count a failure; reaching `max_attempts` sets the failed-login lock,
    /// which is never cleared here.
    #[must_use]
    pub fn record_failure(self, max_attempts: i32) -> Self {
        let failed_logins = self.failed_logins.saturating_add(1);
        let status = if failed_logins >= max_attempts {
            self.status.with(UserStatus::LOCKED_BY_FAILED_LOGIN)
        } else {
            self.status
        };
        Self {
            failed_logins,
            status,
        }
    }

    #[must_use]
    pub fn record_success(self) -> Self {
        Self {
            failed_logins: 0,
            status: self.status,
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Identity matching `username` within `tenant_code`, if any.
    async fn find_by_username(
        &self,
        username: &str,
        tenant_code: &str,
    ) -> Result<Option<Identity>, SessionError>;

    async fn record_login_result(&self, user_id: i64, success: bool) -> Result<(), SessionError>;

    /// Role id (as a string) to role name.
    async fn roles_for_user(&self, user_id: i64) -> Result<BTreeMap<String, String>, SessionError>;

    /// Account creation timestamp, the salt for the user hash.
    async fn created_for_user(&self, user_id: i64) -> Result<Option<i64>, SessionError>;
}

#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
    max_login_attempts: i32,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_max_login_attempts(mut self, attempts: i32) -> Self {
        self.max_login_attempts = attempts.max(1);
        self
    }

    async fn record_failure(&self, user_id: i64) -> Result<(), SessionError> {
        // Row lock keeps concurrent failures from losing increments.
        let mut tx = self.pool.begin().await?;

        let query = "SELECT failed_logins, status FROM users WHERE user_id = $1 FOR UPDATE";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(());
        };

        let before = LoginAttempts {
            failed_logins: row.get("failed_logins"),
            status: UserStatus(row.get("status")),
        };
        let after = before.record_failure(self.max_login_attempts);

        let query = "UPDATE users SET failed_logins = $1, status = $2 WHERE user_id = $3";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(after.failed_logins)
            .bind(after.status.0)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        tx.commit().await?;

        if !before.status.is_locked() && after.status.is_locked() {
            info!(user_id, "account locked after failed logins");
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_username(
        &self,
        username: &str,
        tenant_code: &str,
    ) -> Result<Option<Identity>, SessionError> {
        let query = r"
            SELECT user_id, status, password, created, failed_logins
            FROM users
            WHERE username = $1 AND system_code = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .bind(tenant_code)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;

        Ok(row.map(|row| Identity {
            user_id: row.get("user_id"),
            status: UserStatus(row.get("status")),
            password_hash: row.get("password"),
            created: row.get("created"),
            failed_logins: row.get("failed_logins"),
        }))
    }

    async fn record_login_result(&self, user_id: i64, success: bool) -> Result<(), SessionError> {
        if !success {
            return self.record_failure(user_id).await;
        }

        let query = r"
            UPDATE users
            SET last_login = EXTRACT(EPOCH FROM NOW())::BIGINT,
                login_count = login_count + 1,
                failed_logins = 0
            WHERE user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn roles_for_user(&self, user_id: i64) -> Result<BTreeMap<String, String>, SessionError> {
        let query = r"
            SELECT r.role_id, r.name
            FROM users u
            INNER JOIN user_roles_xref urx USING (user_id)
            INNER JOIN roles r USING (role_id)
            WHERE u.user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let role_id: i32 = row.get("role_id");
                (role_id.to_string(), row.get("name"))
            })
            .collect())
    }

    async fn created_for_user(&self, user_id: i64) -> Result<Option<i64>, SessionError> {
        let query = "SELECT created FROM users WHERE user_id = $1 LIMIT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.map(|row| row.get("created")))
    }
}
