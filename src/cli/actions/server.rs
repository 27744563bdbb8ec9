use crate::{
    api,
    cli::globals::GlobalArgs,
    intake::{ActionIntake, S3Sink, S3SinkConfig},
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

use super::{redact_url, session_manager};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub globals: GlobalArgs,
    pub signing_secret: SecretString,
    /// Where `/v1/actions` stores payloads; the route is off when `None`.
    pub actions: Option<S3SinkConfig>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a store cannot be reached or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let manager = session_manager(&args.globals, &args.signing_secret).await?;

    let intake = args
        .actions
        .as_ref()
        .map(|config| Arc::new(ActionIntake::new(Arc::new(S3Sink::new(config)))));

    api::serve(args.port, Arc::new(manager), intake).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_url(&args.globals.dsn)),
        ("redis_url", redact_url(&args.globals.redis_url)),
        ("session_ttl", args.globals.session_ttl.to_string()),
        (
            "max_login_attempts",
            args.globals.max_login_attempts.to_string(),
        ),
        (
            "actions_bucket",
            args.actions.as_ref().map_or_else(
                || "disabled".to_string(),
                |config| format!("s3://{} ({})", config.bucket, config.region),
            ),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        crate::short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}
