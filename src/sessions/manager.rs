//! Session lifecycle: login, refresh, logout and bulk revocation.
//!
//! The manager sequences writes across the credential database, the session
//! records, the per-user index and the audit trail. There is no transaction
//! spanning them; a failing step returns its error and leaves the effects of
//! earlier steps in place.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::audit::AuditTrail;
use super::config::{Clock, SessionConfig, SystemClock};
use super::credentials::{validate_status, CredentialStore};
use super::error::SessionError;
use super::index::{IndexEntry, IndexedSession, UserSessionIndex};
use super::password::{derive_user_hash, hash_password, secure_compare};
use super::records::{Session, SessionRecordStore};
use super::token::{generate_nonce, SessionClaims, TokenSigner};
use crate::store::KeyValueStore;

/// Everything the manager talks to, handed over once at construction.
pub struct SessionContext {
    pub config: SessionConfig,
    pub kv: Arc<dyn KeyValueStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub audit: Arc<dyn AuditTrail>,
    pub signer: Arc<dyn TokenSigner>,
}

#[derive(Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: SecretString,
    pub tenant_code: String,
}

pub struct SessionManager {
    config: SessionConfig,
    kv: Arc<dyn KeyValueStore>,
    records: SessionRecordStore,
    index: UserSessionIndex,
    credentials: Arc<dyn CredentialStore>,
    audit: Arc<dyn AuditTrail>,
    signer: Arc<dyn TokenSigner>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    #[must_use]
    pub fn new(context: SessionContext) -> Self {
        let ttl = context.config.session_ttl();
        Self {
            records: SessionRecordStore::new(context.kv.clone(), ttl),
            index: UserSessionIndex::new(
                context.kv.clone(),
                ttl,
                context.config.index_retries(),
            ),
            config: context.config,
            kv: context.kv,
            credentials: context.credentials,
            audit: context.audit,
            signer: context.signer,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Verify credentials and issue a new session token.
    ///
    /// A wrong password is counted against the account before
    /// [`SessionError::PasswordMismatch`] is returned; enough of them lock it.
    ///
    /// # Errors
    /// Returns [`SessionError::UserNotFound`], [`SessionError::UserLocked`],
    /// [`SessionError::PasswordMismatch`], [`SessionError::NonUniqueToken`] or
    /// any store error.
    #[instrument(
        skip(self, request),
        fields(username = %request.username, tenant = %request.tenant_code)
    )]
    pub async fn create(&self, request: &LoginRequest) -> Result<String, SessionError> {
        let identity = self
            .credentials
            .find_by_username(&request.username, &request.tenant_code)
            .await?
            .ok_or(SessionError::UserNotFound)?;

        validate_status(&identity)?;

        let hashed = hash_password(request.password.expose_secret(), identity.created)?;
        if !secure_compare(&hashed, &identity.password_hash) {
            self.credentials
                .record_login_result(identity.user_id, false)
                .await?;
            warn!(user_id = identity.user_id, "password mismatch");
            return Err(SessionError::PasswordMismatch);
        }

        let roles = self.credentials.roles_for_user(identity.user_id).await?;
        let created = self.clock.now();

        let claims = SessionClaims {
            user_id: identity.user_id,
            roles: roles.clone(),
            iat: created,
            rs: generate_nonce(self.config.nonce_length()),
        };
        let token = self.signer.sign(&claims)?;

        let session = Session {
            token: token.clone(),
            user_id: identity.user_id,
            roles,
            created,
            timeout: self.config.session_ttl_seconds(),
        };
        self.save(&token, &session, identity.created).await?;

        self.credentials
            .record_login_result(identity.user_id, true)
            .await?;
        self.audit.open(&token, identity.user_id, created).await?;

        info!(user_id = identity.user_id, "session created");

        Ok(token)
    }

    /// Store `session` under `token` and add it to the owner's index entry.
    /// `user_created` is the owner's account creation time.
    ///
    /// # Errors
    /// Returns [`SessionError::NonUniqueToken`] if `token` is taken, or any
    /// store error.
    #[instrument(skip(self, token, session), fields(user_id = session.user_id))]
    pub async fn save(
        &self,
        token: &str,
        session: &Session,
        user_created: i64,
    ) -> Result<(), SessionError> {
        let roles_list = session.role_ids()?;
        let user_hash = derive_user_hash(session.user_id, user_created)?;

        self.records.insert(token, session).await?;
        self.index
            .append(
                &user_hash,
                IndexedSession {
                    token: token.to_string(),
                    roles_list,
                },
            )
            .await
    }

    /// Restart the TTL of an existing session and move its `created`
    /// timestamp to now.
    ///
    /// # Errors
    /// Returns [`SessionError::SessionNotFound`] if the session expired or
    /// never existed.
    #[instrument(skip(self, token))]
    pub async fn refresh(&self, token: &str) -> Result<(), SessionError> {
        let mut session = self
            .records
            .load(token)
            .await?
            .ok_or(SessionError::SessionNotFound)?;

        session.created = self.clock.now();
        self.records.rewrite(token, &session).await?;
        self.audit.touch(token, session.created).await?;

        debug!(user_id = session.user_id, "session refreshed");
        Ok(())
    }

    /// Log out a single session. Unknown tokens are ignored.
    ///
    /// # Errors
    /// Returns any store error.
    #[instrument(skip(self, token))]
    pub async fn delete(&self, token: &str) -> Result<(), SessionError> {
        let Some(session) = self.records.load(token).await? else {
            debug!("session already gone");
            return Ok(());
        };

        match self.user_hash_for(&session).await? {
            Some(user_hash) => {
                self.index.remove(&user_hash, token).await?;
            }
            None => warn!(user_id = session.user_id, "session owner not found"),
        }

        self.records.delete(token).await?;
        self.audit.close(token, self.clock.now()).await?;

        info!(user_id = session.user_id, "session deleted");
        Ok(())
    }

    /// [`Self::delete`] each token in turn, stopping at the first error.
    ///
    /// # Errors
    /// Returns the first error encountered.
    pub async fn delete_multiple<T>(&self, tokens: &[T]) -> Result<(), SessionError>
    where
        T: AsRef<str> + Sync,
    {
        for token in tokens {
            self.delete(token.as_ref()).await?;
        }
        Ok(())
    }

    /// Index entry of the user owning `token`, if the session, the user and
    /// the entry all exist.
    ///
    /// # Errors
    /// Returns any store error.
    #[instrument(skip(self, token))]
    pub async fn find_user_sessions_by_token(
        &self,
        token: &str,
    ) -> Result<Option<IndexEntry>, SessionError> {
        let Some(session) = self.records.load(token).await? else {
            return Ok(None);
        };
        let Some(user_hash) = self.user_hash_for(&session).await? else {
            return Ok(None);
        };
        Ok(self.index.read_entry(&user_hash).await?.map(|v| v.entry))
    }

    /// Delete every session of the user owning `token`. Returns how many
    /// sessions were removed.
    ///
    /// # Errors
    /// Returns any store error; sessions deleted before it stay deleted.
    #[instrument(skip(self, token))]
    pub async fn find_and_delete_all_by_token(&self, token: &str) -> Result<usize, SessionError> {
        let Some(session) = self.records.load(token).await? else {
            return Ok(0);
        };
        let Some(entry) = self.find_user_sessions_by_token(token).await? else {
            return Ok(0);
        };
        if entry.sessions.is_empty() {
            return Ok(0);
        }
        self.delete_user_sessions(&entry, session.user_id).await
    }

    /// Delete every session indexed under `user_hash`. A user with no
    /// sessions is not an error, as after a password reset.
    ///
    /// # Errors
    /// Returns any store error; sessions deleted before it stay deleted.
    #[instrument(skip(self, user_hash))]
    pub async fn delete_all_by_user_hash(
        &self,
        user_hash: &str,
        user_id: i64,
    ) -> Result<usize, SessionError> {
        let Some(current) = self.index.read_entry(user_hash).await? else {
            info!(user_id, "no sessions for user");
            return Ok(0);
        };
        self.delete_user_sessions(&current.entry, user_id).await
    }

    /// Session behind `token`, if it is still live.
    ///
    /// # Errors
    /// Returns any store error or [`SessionError::MalformedRecord`].
    pub async fn validate(&self, token: &str) -> Result<Option<Session>, SessionError> {
        self.records.load(token).await
    }

    /// # Errors
    /// Returns any store error.
    pub async fn is_active(&self, token: &str) -> Result<bool, SessionError> {
        self.records.exists(token).await
    }

    async fn user_hash_for(&self, session: &Session) -> Result<Option<String>, SessionError> {
        match self.credentials.created_for_user(session.user_id).await? {
            Some(created) => Ok(Some(derive_user_hash(session.user_id, created)?)),
            None => Ok(None),
        }
    }

    async fn delete_user_sessions(
        &self,
        entry: &IndexEntry,
        user_id: i64,
    ) -> Result<usize, SessionError> {
        let mut deleted = 0;
        for session in &entry.sessions {
            self.records.delete(&session.token).await?;
            for cache_key in self.config.evictions_for(&session.roles_list) {
                self.kv.delete(cache_key).await?;
                debug!(cache_key, "evicted side cache");
            }
            self.audit.close(&session.token, self.clock.now()).await?;
            deleted += 1;
        }
        self.index.delete(&entry.user_id_hash).await?;

        info!(deleted, user_id, "deleted sessions for user");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::config::ManualClock;
    use crate::sessions::credentials::UserStatus;
    use crate::sessions::error::ErrorKind;
    use crate::sessions::memory::{MemoryAuditTrail, MemoryCredentials};
    use crate::sessions::token::Hs256Signer;
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const NOW: i64 = 1_750_000_000;
    const CREATED: i64 = 1_700_000_000;
    const PASSWORD: &str = "Str0ng!Pass";

    struct Fixture {
        kv: Arc<MemoryStore>,
        credentials: Arc<MemoryCredentials>,
        audit: Arc<MemoryAuditTrail>,
        clock: Arc<ManualClock>,
        manager: SessionManager,
    }

    async fn fixture() -> Fixture {
        let kv = Arc::new(MemoryStore::new());
        let credentials = Arc::new(MemoryCredentials::new());
        let audit = Arc::new(MemoryAuditTrail::new());
        let clock = Arc::new(ManualClock::new(NOW));

        assert!(credentials
            .add_user(42, "ana", "clinic-a", PASSWORD, CREATED, &[(4, "clinician")])
            .await
            .is_ok());
        assert!(credentials
            .add_user(7, "ben", "clinic-a", PASSWORD, CREATED + 1, &[(1, "patient")])
            .await
            .is_ok());

        let manager = SessionManager::new(SessionContext {
            config: SessionConfig::new(),
            kv: kv.clone(),
            credentials: credentials.clone(),
            audit: audit.clone(),
            signer: Arc::new(Hs256Signer::new(&SecretString::from(
                "signing-secret".to_string(),
            ))),
        })
        .with_clock(clock.clone());

        Fixture {
            kv,
            credentials,
            audit,
            clock,
            manager,
        }
    }

    fn login(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            tenant_code: "clinic-a".to_string(),
        }
    }

    async fn create(f: &Fixture, username: &str) -> String {
        match f.manager.create(&login(username, PASSWORD)).await {
            Ok(token) => token,
            Err(e) => panic!("create failed: {e}"),
        }
    }

    fn user_hash(user_id: i64, created: i64) -> String {
        derive_user_hash(user_id, created).unwrap_or_default()
    }

    #[tokio::test]
    async fn create_stores_session_index_and_audit() {
        let f = fixture().await;
        let token = create(&f, "ana").await;

        let session = f.manager.validate(&token).await.ok().flatten();
        assert_eq!(
            session,
            Some(Session {
                token: token.clone(),
                user_id: 42,
                roles: BTreeMap::from([("4".to_string(), "clinician".to_string())]),
                created: NOW,
                timeout: 960,
            })
        );

        let entry = f.manager.find_user_sessions_by_token(&token).await.ok().flatten();
        let Some(entry) = entry else {
            panic!("index entry missing");
        };
        assert_eq!(entry.user_id_hash, user_hash(42, CREATED));
        assert_eq!(
            entry.sessions,
            vec![IndexedSession {
                token: token.clone(),
                roles_list: vec![4],
            }]
        );

        let row = f.audit.row(&token).await;
        assert_eq!(row.as_ref().map(|r| (r.started, r.last_active)), Some((NOW, NOW)));
        assert_eq!(row.and_then(|r| r.ended), None);
        assert_eq!(f.credentials.login_count(42).await, 1);
    }

    #[tokio::test]
    async fn tokens_are_unique_per_login() {
        let f = fixture().await;
        let first = create(&f, "ana").await;
        let second = create(&f, "ana").await;
        assert_ne!(first, second);

        let entry = f.manager.find_user_sessions_by_token(&first).await.ok().flatten();
        assert_eq!(entry.map(|e| e.sessions.len()), Some(2));
    }

    #[tokio::test]
    async fn create_rejects_unknown_deleted_and_locked_users() {
        let f = fixture().await;

        let err = f.manager.create(&login("nobody", PASSWORD)).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::UserNotFound));

        f.credentials
            .set_status(7, UserStatus(UserStatus::DELETED))
            .await;
        let err = f.manager.create(&login("ben", PASSWORD)).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::UserNotFound));

        f.credentials
            .set_status(42, UserStatus(UserStatus::LOCKED))
            .await;
        let err = f.manager.create(&login("ana", PASSWORD)).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::UserLocked));

        assert!(f.kv.is_empty().await);
    }

    #[tokio::test]
    async fn sixth_failure_locks_account() {
        let f = fixture().await;

        for attempt in 1..=5 {
            let err = f.manager.create(&login("ana", "Wr0ng!Pass")).await.err();
            assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::PasswordMismatch));
            let identity = f.credentials.identity(42).await;
            assert_eq!(identity.as_ref().map(|i| i.failed_logins), Some(attempt));
            assert_eq!(identity.map(|i| i.status.is_locked()), Some(false));
        }

        let err = f.manager.create(&login("ana", "Wr0ng!Pass")).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::PasswordMismatch));
        assert_eq!(
            f.credentials.identity(42).await.map(|i| i.status.is_locked()),
            Some(true)
        );

        let err = f.manager.create(&login("ana", PASSWORD)).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::UserLocked));
    }

    #[tokio::test]
    async fn success_resets_failed_logins() {
        let f = fixture().await;
        for _ in 0..3 {
            assert!(f.manager.create(&login("ana", "nope")).await.is_err());
        }
        create(&f, "ana").await;
        assert_eq!(f.credentials.identity(42).await.map(|i| i.failed_logins), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_moves_created_and_resets_ttl() {
        let f = fixture().await;
        let token = create(&f, "ana").await;

        tokio::time::advance(Duration::from_secs(600)).await;
        f.clock.advance(600);
        assert!(f.kv.ttl(&token).await <= Some(Duration::from_secs(360)));

        assert!(f.manager.refresh(&token).await.is_ok());

        let session = f.manager.validate(&token).await.ok().flatten();
        assert_eq!(session.as_ref().map(|s| s.created), Some(NOW + 600));
        assert_eq!(session.as_ref().map(|s| s.user_id), Some(42));
        assert_eq!(session.map(|s| s.roles.len()), Some(1));
        assert_eq!(f.kv.ttl(&token).await, Some(Duration::from_secs(960)));

        let row = f.audit.row(&token).await;
        assert_eq!(row.map(|r| (r.started, r.last_active)), Some((NOW, NOW + 600)));
    }

    #[tokio::test]
    async fn refresh_missing_session_fails() {
        let f = fixture().await;
        let err = f.manager.refresh("missing").await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::SessionNotFound));
    }

    #[tokio::test]
    async fn delete_only_session_removes_index_entry() {
        let f = fixture().await;
        let token = create(&f, "ana").await;
        f.clock.advance(30);

        assert!(f.manager.delete(&token).await.is_ok());

        assert!(!f.manager.is_active(&token).await.unwrap_or(true));
        assert!(!f.kv.exists(&user_hash(42, CREATED)).await.unwrap_or(true));

        let row = f.audit.row(&token).await;
        assert_eq!(row.map(|r| (r.ended, r.hard_logout)), Some((Some(NOW + 30), true)));
    }

    #[tokio::test]
    async fn delete_keeps_other_sessions_indexed() {
        let f = fixture().await;
        let first = create(&f, "ana").await;
        let second = create(&f, "ana").await;

        assert!(f.manager.delete(&first).await.is_ok());

        let entry = f.manager.find_user_sessions_by_token(&second).await.ok().flatten();
        assert_eq!(entry.map(|e| e.tokens().join(",")), Some(second.clone()));
        assert!(f.manager.is_active(&second).await.unwrap_or(false));
    }

    #[tokio::test]
    async fn delete_unknown_token_is_noop() {
        let f = fixture().await;
        assert!(f.manager.delete("missing").await.is_ok());
        assert!(f.audit.rows().await.is_empty());
    }

    #[tokio::test]
    async fn delete_multiple_removes_each() {
        let f = fixture().await;
        let tokens = vec![create(&f, "ana").await, create(&f, "ben").await];

        assert!(f.manager.delete_multiple(tokens.as_slice()).await.is_ok());
        for token in &tokens {
            assert!(!f.manager.is_active(token).await.unwrap_or(true));
        }
        assert!(f.kv.is_empty().await);
    }

    #[tokio::test]
    async fn delete_all_by_user_hash_without_entry_is_zero() {
        let f = fixture().await;
        assert_eq!(
            f.manager
                .delete_all_by_user_hash(&user_hash(42, CREATED), 42)
                .await
                .ok(),
            Some(0)
        );
    }

    #[tokio::test]
    async fn delete_all_by_user_hash_removes_sessions_and_evicts() {
        let f = fixture().await;
        let first = create(&f, "ana").await;
        let second = create(&f, "ana").await;
        let other = create(&f, "ben").await;
        assert!(f
            .kv
            .set_with_ttl("active_clinician_list", b"[42]", Duration::from_secs(60))
            .await
            .is_ok());

        let deleted = f
            .manager
            .delete_all_by_user_hash(&user_hash(42, CREATED), 42)
            .await
            .ok();
        assert_eq!(deleted, Some(2));

        for token in [&first, &second] {
            assert!(!f.manager.is_active(token).await.unwrap_or(true));
            assert_eq!(f.audit.row(token).await.map(|r| r.hard_logout), Some(true));
        }
        assert!(!f.kv.exists("active_clinician_list").await.unwrap_or(true));
        assert!(!f.kv.exists(&user_hash(42, CREATED)).await.unwrap_or(true));

        // other users are untouched
        assert!(f.manager.is_active(&other).await.unwrap_or(false));
        assert_eq!(f.audit.row(&other).await.map(|r| r.hard_logout), Some(false));
    }

    #[tokio::test]
    async fn find_and_delete_all_by_token() {
        let f = fixture().await;
        let first = create(&f, "ben").await;
        let second = create(&f, "ben").await;
        assert!(f
            .kv
            .set_with_ttl("active_clinician_list", b"[42]", Duration::from_secs(60))
            .await
            .is_ok());

        assert_eq!(f.manager.find_and_delete_all_by_token(&second).await.ok(), Some(2));
        assert!(!f.manager.is_active(&first).await.unwrap_or(true));

        // patients do not evict the clinician list
        assert!(f.kv.exists("active_clinician_list").await.unwrap_or(false));

        assert_eq!(f.manager.find_and_delete_all_by_token(&second).await.ok(), Some(0));
    }

    #[tokio::test]
    async fn save_rejects_taken_token() {
        let f = fixture().await;
        let session = Session {
            token: String::new(),
            user_id: 42,
            roles: BTreeMap::new(),
            created: NOW,
            timeout: 960,
        };
        assert!(f.manager.save("t1", &session, CREATED).await.is_ok());
        let err = f.manager.save("t1", &session, CREATED).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NonUniqueToken));

        let entry = f.manager.find_user_sessions_by_token("t1").await.ok().flatten();
        assert_eq!(entry.map(|e| e.sessions.len()), Some(1));
    }

    #[tokio::test]
    async fn create_delete_then_refresh_fails() {
        let f = fixture().await;
        let token = create(&f, "ana").await;

        assert!(f.manager.delete(&token).await.is_ok());
        let err = f.manager.refresh(&token).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::SessionNotFound));
    }
}
