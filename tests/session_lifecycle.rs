use anyhow::{ensure, Context, Result};
use secrecy::SecretString;
use std::{env, sync::Arc, time::Duration};
use tessera::sessions::{
    config::ManualClock, password::derive_user_hash, ErrorKind, Hs256Signer, LoginRequest,
    MemoryAuditTrail, MemoryCredentials, SessionConfig, SessionContext, SessionManager,
    TokenSigner,
};
use tessera::store::{KeyValueStore, MemoryStore, RedisStore};

const SECRET: &str = "integration-secret";
const CREATED: i64 = 1_700_000_000;
const NOW: i64 = 1_750_000_000;

struct TestContext {
    kv: Arc<dyn KeyValueStore>,
    credentials: Arc<MemoryCredentials>,
    audit: Arc<MemoryAuditTrail>,
    manager: SessionManager,
}

async fn context(kv: Arc<dyn KeyValueStore>) -> Result<TestContext> {
    let credentials = Arc::new(MemoryCredentials::new());
    credentials
        .add_user(
            42,
            "ana",
            "clinic-a",
            "Str0ng!Pass",
            CREATED,
            &[(4, "clinician"), (1, "patient")],
        )
        .await?;
    let audit = Arc::new(MemoryAuditTrail::new());

    let manager = SessionManager::new(SessionContext {
        config: SessionConfig::new().with_eviction_rule(1, "patient_directory"),
        kv: kv.clone(),
        credentials: credentials.clone(),
        audit: audit.clone(),
        signer: Arc::new(Hs256Signer::new(&SecretString::from(SECRET.to_string()))),
    })
    .with_clock(Arc::new(ManualClock::new(NOW)));

    Ok(TestContext {
        kv,
        credentials,
        audit,
        manager,
    })
}

fn login(password: &str) -> LoginRequest {
    LoginRequest {
        username: "ana".to_string(),
        password: SecretString::from(password.to_string()),
        tenant_code: "clinic-a".to_string(),
    }
}

fn user_hash() -> Result<String> {
    Ok(derive_user_hash(42, CREATED)?)
}

#[tokio::test]
async fn login_refresh_logout() -> Result<()> {
    let ctx = context(Arc::new(MemoryStore::new())).await?;

    let token = ctx.manager.create(&login("Str0ng!Pass")).await?;

    let claims = Hs256Signer::new(&SecretString::from(SECRET.to_string())).verify(&token)?;
    ensure!(claims.user_id == 42);
    ensure!(claims.iat == NOW);
    ensure!(claims.roles.len() == 2);
    ensure!(claims.rs.len() >= 16);

    let session = ctx
        .manager
        .validate(&token)
        .await?
        .context("session should be live")?;
    ensure!(session.roles == claims.roles);

    ctx.manager.refresh(&token).await?;

    let entry = ctx
        .manager
        .find_user_sessions_by_token(&token)
        .await?
        .context("index entry should exist")?;
    ensure!(entry.user_id_hash == user_hash()?);
    ensure!(entry.tokens() == vec![token.as_str()]);
    ensure!(entry.sessions[0].roles_list == vec![1, 4]);

    ctx.manager.delete(&token).await?;
    ensure!(!ctx.manager.is_active(&token).await?);
    ensure!(!ctx.kv.exists(&user_hash()?).await?);

    let err = ctx.manager.refresh(&token).await.err();
    ensure!(err.map(|e| e.kind()) == Some(ErrorKind::SessionNotFound));
    Ok(())
}

#[tokio::test]
async fn password_reset_revokes_everything() -> Result<()> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let ctx = context(kv.clone()).await?;

    let mut tokens = Vec::new();
    for _ in 0..3 {
        tokens.push(ctx.manager.create(&login("Str0ng!Pass")).await?);
    }
    for key in ["active_clinician_list", "patient_directory"] {
        kv.set_with_ttl(key, b"cached", Duration::from_secs(60))
            .await?;
    }

    let deleted = ctx.manager.delete_all_by_user_hash(&user_hash()?, 42).await?;
    ensure!(deleted == 3);

    for token in &tokens {
        ensure!(!ctx.manager.is_active(token).await?);
        let row = ctx.audit.row(token).await.context("audit row missing")?;
        ensure!(row.hard_logout && row.ended == Some(NOW));
    }
    for key in ["active_clinician_list", "patient_directory"] {
        ensure!(!kv.exists(key).await?, "{key} should be evicted");
    }

    // nothing left, still not an error
    ensure!(ctx.manager.delete_all_by_user_hash(&user_hash()?, 42).await? == 0);
    Ok(())
}

#[tokio::test]
async fn lockout_blocks_correct_password() -> Result<()> {
    let ctx = context(Arc::new(MemoryStore::new())).await?;

    for _ in 0..6 {
        let err = ctx.manager.create(&login("Wr0ng!Pass")).await.err();
        ensure!(err.map(|e| e.kind()) == Some(ErrorKind::PasswordMismatch));
    }

    let identity = ctx
        .credentials
        .identity(42)
        .await
        .context("identity missing")?;
    ensure!(identity.failed_logins == 6);
    ensure!(identity.status.is_locked());

    let err = ctx.manager.create(&login("Str0ng!Pass")).await.err();
    ensure!(err.map(|e| e.kind()) == Some(ErrorKind::UserLocked));
    ensure!(ctx.audit.rows().await.is_empty());
    Ok(())
}

// Runs against a real Redis when TESSERA_TEST_REDIS_URL is set.
#[tokio::test]
async fn redis_store_lifecycle() -> Result<()> {
    let Ok(url) = env::var("TESSERA_TEST_REDIS_URL") else {
        return Ok(());
    };
    let kv: Arc<dyn KeyValueStore> = Arc::new(RedisStore::connect(&url).await?);
    kv.delete(&user_hash()?).await?;

    let ctx = context(kv.clone()).await?;
    let first = ctx.manager.create(&login("Str0ng!Pass")).await?;
    let second = ctx.manager.create(&login("Str0ng!Pass")).await?;

    ctx.manager.delete(&first).await?;
    let entry = ctx
        .manager
        .find_user_sessions_by_token(&second)
        .await?
        .context("index entry should exist")?;
    ensure!(entry.tokens() == vec![second.as_str()]);

    ensure!(ctx.manager.find_and_delete_all_by_token(&second).await? == 1);
    ensure!(!kv.exists(&second).await?);
    ensure!(!kv.exists(&user_hash()?).await?);
    Ok(())
}
