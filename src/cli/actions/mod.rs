pub mod revoke;
pub mod server;

// Internal "interpreter" for `Action`.
mod run;

use crate::cli::globals::GlobalArgs;
use crate::sessions::{
    Hs256Signer, PgAuditTrail, PgCredentialStore, SessionConfig, SessionContext, SessionManager,
};
use crate::store::RedisStore;
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use url::Url;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Revoke(revoke::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> Result<()> {
        run::execute(self).await
    }
}

/// Connect both stores and build the session manager.
async fn session_manager(
    globals: &GlobalArgs,
    signing_secret: &SecretString,
) -> Result<SessionManager> {
    let redis_url = Url::parse(&globals.redis_url).context("invalid redis url")?;
    anyhow::ensure!(
        matches!(redis_url.scheme(), "redis" | "rediss"),
        "redis url must use redis:// or rediss://"
    );

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&globals.dsn)
        .await
        .context("Failed to connect to database")?;

    let kv = RedisStore::connect(redis_url.as_str())
        .await
        .context("Failed to connect to redis")?;

    let config = SessionConfig::new().with_session_ttl_seconds(globals.session_ttl);

    Ok(SessionManager::new(SessionContext {
        config,
        kv: Arc::new(kv),
        credentials: Arc::new(
            PgCredentialStore::new(pool.clone())
                .with_max_login_attempts(globals.max_login_attempts),
        ),
        audit: Arc::new(PgAuditTrail::new(pool)),
        signer: Arc::new(Hs256Signer::new(signing_secret)),
    }))
}

/// Hide the password of a connection string before logging it.
fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-url".to_string(),
    }
}
