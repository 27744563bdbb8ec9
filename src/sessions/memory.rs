//! In-process credential and audit stores for tests and local runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::audit::{AuditRow, AuditTrail};
use super::config::{Clock, SystemClock, DEFAULT_MAX_LOGIN_ATTEMPTS};
use super::credentials::{CredentialStore, Identity, LoginAttempts, UserStatus};
use super::error::SessionError;
use super::password::hash_password;

#[derive(Clone, Debug)]
struct UserRow {
    username: String,
    tenant_code: String,
    identity: Identity,
    roles: BTreeMap<String, String>,
    login_count: u64,
    last_login: Option<i64>,
}

#[derive(Debug)]
pub struct MemoryCredentials {
    users: Mutex<HashMap<i64, UserRow>>,
    max_login_attempts: i32,
}

impl Default for MemoryCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_max_login_attempts(mut self, attempts: i32) -> Self {
        self.max_login_attempts = attempts.max(1);
        self
    }

    /// Register a user, hashing `password` with `created` as the salt.
    ///
    /// # Errors
    /// Returns [`SessionError::Hash`] if hashing fails.
    pub async fn add_user(
        &self,
        user_id: i64,
        username: &str,
        tenant_code: &str,
        password: &str,
        created: i64,
        roles: &[(i64, &str)],
    ) -> Result<(), SessionError> {
        let row = UserRow {
            username: username.to_string(),
            tenant_code: tenant_code.to_string(),
            identity: Identity {
                user_id,
                status: UserStatus::default(),
                password_hash: hash_password(password, created)?,
                created,
                failed_logins: 0,
            },
            roles: roles
                .iter()
                .map(|(id, name)| (id.to_string(), (*name).to_string()))
                .collect(),
            login_count: 0,
            last_login: None,
        };
        self.users.lock().await.insert(user_id, row);
        Ok(())
    }

    pub async fn set_status(&self, user_id: i64, status: UserStatus) {
        if let Some(row) = self.users.lock().await.get_mut(&user_id) {
            row.identity.status = status;
        }
    }

    pub async fn identity(&self, user_id: i64) -> Option<Identity> {
        self.users
            .lock()
            .await
            .get(&user_id)
            .map(|row| row.identity.clone())
    }

    pub async fn login_count(&self, user_id: i64) -> u64 {
        self.users
            .lock()
            .await
            .get(&user_id)
            .map_or(0, |row| row.login_count)
    }

    pub async fn last_login(&self, user_id: i64) -> Option<i64> {
        self.users
            .lock()
            .await
            .get(&user_id)
            .and_then(|row| row.last_login)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn find_by_username(
        &self,
        username: &str,
        tenant_code: &str,
    ) -> Result<Option<Identity>, SessionError> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|row| row.username == username && row.tenant_code == tenant_code)
            .map(|row| row.identity.clone()))
    }

    async fn record_login_result(&self, user_id: i64, success: bool) -> Result<(), SessionError> {
        let mut users = self.users.lock().await;
        let Some(row) = users.get_mut(&user_id) else {
            return Ok(());
        };

        let attempts = LoginAttempts {
            failed_logins: row.identity.failed_logins,
            status: row.identity.status,
        };
        let attempts = if success {
            row.login_count += 1;
            row.last_login = Some(SystemClock.now());
            attempts.record_success()
        } else {
            attempts.record_failure(self.max_login_attempts)
        };
        row.identity.failed_logins = attempts.failed_logins;
        row.identity.status = attempts.status;
        Ok(())
    }

    async fn roles_for_user(&self, user_id: i64) -> Result<BTreeMap<String, String>, SessionError> {
        Ok(self
            .users
            .lock()
            .await
            .get(&user_id)
            .map(|row| row.roles.clone())
            .unwrap_or_default())
    }

    async fn created_for_user(&self, user_id: i64) -> Result<Option<i64>, SessionError> {
        Ok(self
            .users
            .lock()
            .await
            .get(&user_id)
            .map(|row| row.identity.created))
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditTrail {
    rows: Mutex<Vec<AuditRow>>,
}

impl MemoryAuditTrail {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row(&self, token: &str) -> Option<AuditRow> {
        self.rows
            .lock()
            .await
            .iter()
            .find(|row| row.token == token)
            .cloned()
    }

    pub async fn rows(&self) -> Vec<AuditRow> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl AuditTrail for MemoryAuditTrail {
    async fn open(&self, token: &str, user_id: i64, started: i64) -> Result<(), SessionError> {
        self.rows.lock().await.push(AuditRow {
            token: token.to_string(),
            user_id,
            started,
            last_active: started,
            ended: None,
            hard_logout: false,
        });
        Ok(())
    }

    async fn touch(&self, token: &str, last_active: i64) -> Result<(), SessionError> {
        for row in self.rows.lock().await.iter_mut().filter(|r| r.token == token) {
            row.last_active = last_active;
        }
        Ok(())
    }

    async fn close(&self, token: &str, ended: i64) -> Result<(), SessionError> {
        for row in self.rows.lock().await.iter_mut().filter(|r| r.token == token) {
            row.ended = Some(ended);
            row.hard_logout = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn credentials() -> MemoryCredentials {
        let credentials = MemoryCredentials::new();
        assert!(credentials
            .add_user(42, "ana", "clinic-a", "Str0ng!Pass", 1_700_000_000, &[(4, "clinician")])
            .await
            .is_ok());
        credentials
    }

    #[tokio::test]
    async fn lookup_is_scoped_to_tenant() {
        let credentials = credentials().await;
        let found = credentials.find_by_username("ana", "clinic-a").await.ok().flatten();
        assert_eq!(found.map(|i| i.user_id), Some(42));

        let other = credentials.find_by_username("ana", "clinic-b").await.ok().flatten();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn login_results_update_counters() {
        let credentials = credentials().await;
        for _ in 0..3 {
            assert!(credentials.record_login_result(42, false).await.is_ok());
        }
        assert_eq!(credentials.identity(42).await.map(|i| i.failed_logins), Some(3));

        assert!(credentials.record_login_result(42, true).await.is_ok());
        assert_eq!(credentials.identity(42).await.map(|i| i.failed_logins), Some(0));
        assert_eq!(credentials.login_count(42).await, 1);
        assert!(credentials.last_login(42).await.is_some());

        // unknown users are ignored
        assert!(credentials.record_login_result(7, false).await.is_ok());
    }

    #[tokio::test]
    async fn roles_and_created() {
        let credentials = credentials().await;
        let roles = credentials.roles_for_user(42).await.unwrap_or_default();
        assert_eq!(roles.get("4").map(String::as_str), Some("clinician"));
        assert_eq!(credentials.created_for_user(42).await.ok().flatten(), Some(1_700_000_000));
        assert_eq!(credentials.created_for_user(7).await.ok().flatten(), None);
    }

    #[tokio::test]
    async fn audit_rows_open_touch_close() {
        let audit = MemoryAuditTrail::new();
        assert!(audit.open("t1", 42, 100).await.is_ok());
        assert!(audit.touch("t1", 150).await.is_ok());
        assert!(audit.close("t1", 200).await.is_ok());

        assert_eq!(
            audit.row("t1").await,
            Some(AuditRow {
                token: "t1".to_string(),
                user_id: 42,
                started: 100,
                last_active: 150,
                ended: Some(200),
                hard_logout: true,
            })
        );
        // closing an unknown token is a no-op
        assert!(audit.close("t2", 200).await.is_ok());
        assert_eq!(audit.rows().await.len(), 1);
    }
}
