//! Session start/end log kept in `session_summaries`.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::Instrument;

use super::error::SessionError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditRow {
    pub token: String,
    pub user_id: i64,
    pub started: i64,
    pub last_active: i64,
    pub ended: Option<i64>,
    pub hard_logout: bool,
}

#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn open(&self, token: &str, user_id: i64, started: i64) -> Result<(), SessionError>;

    async fn touch(&self, token: &str, last_active: i64) -> Result<(), SessionError>;

    /// Mark the session as ended by an explicit logout.
    async fn close(&self, token: &str, ended: i64) -> Result<(), SessionError>;
}

#[derive(Clone, Debug)]
pub struct PgAuditTrail {
    pool: PgPool,
}

impl PgAuditTrail {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditTrail for PgAuditTrail {
    async fn open(&self, token: &str, user_id: i64, started: i64) -> Result<(), SessionError> {
        let query = r"
            INSERT INTO session_summaries (token, user_id, started, last_active, created)
            VALUES ($1, $2, $3, $3, EXTRACT(EPOCH FROM NOW())::BIGINT)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token)
            .bind(user_id)
            .bind(started)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn touch(&self, token: &str, last_active: i64) -> Result<(), SessionError> {
        let query = "UPDATE session_summaries SET last_active = $1 WHERE token = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(last_active)
            .bind(token)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn close(&self, token: &str, ended: i64) -> Result<(), SessionError> {
        // Closing an unknown token is not an error; it may predate the audit log.
        let query = "UPDATE session_summaries SET ended = $1, hard_logout = TRUE WHERE token = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(ended)
            .bind(token)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}
