use crate::{
    cli::{
        actions::{revoke, server, Action},
        globals::GlobalArgs,
    },
    intake::S3SinkConfig,
};
use anyhow::{Context, Result};
use secrecy::SecretString;

fn globals(matches: &clap::ArgMatches) -> Result<GlobalArgs> {
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let redis_url = matches
        .get_one::<String>("redis-url")
        .cloned()
        .context("missing required argument: --redis-url")?;

    let mut globals = GlobalArgs::new(dsn, redis_url);
    if let Some(ttl) = matches.get_one::<u64>("session-ttl") {
        globals = globals.with_session_ttl(*ttl);
    }
    if let Some(attempts) = matches.get_one::<i32>("max-login-attempts") {
        globals = globals.with_max_login_attempts(*attempts);
    }
    Ok(globals)
}

fn actions_sink(matches: &clap::ArgMatches) -> Result<Option<S3SinkConfig>> {
    let Some(bucket) = matches.get_one::<String>("actions-bucket").cloned() else {
        return Ok(None);
    };
    let access_key_id = matches
        .get_one::<String>("s3-access-key-id")
        .cloned()
        .context("missing required argument: --s3-access-key-id")?;
    let secret_access_key = matches
        .get_one::<String>("s3-secret-access-key")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --s3-secret-access-key")?;

    let mut config = S3SinkConfig::new(bucket, access_key_id, secret_access_key)
        .with_force_path_style(matches.get_flag("s3-force-path-style"));
    if let Some(region) = matches.get_one::<String>("s3-region") {
        config = config.with_region(region.clone());
    }
    if let Some(endpoint) = matches.get_one::<String>("s3-endpoint") {
        config = config.with_endpoint(endpoint.clone());
    }
    Ok(Some(config))
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if let Some(sub_m) = matches.subcommand_matches("revoke") {
        let user_id = sub_m
            .get_one::<i64>("user-id")
            .copied()
            .context("missing required argument: --user-id")?;

        let target = if let Some(hash) = sub_m.get_one::<String>("user-hash") {
            revoke::Target::UserHash(hash.clone())
        } else {
            sub_m
                .get_one::<i64>("created")
                .copied()
                .map(revoke::Target::Created)
                .context("missing required argument: --created or --user-hash")?
        };

        return Ok(Action::Revoke(revoke::Args {
            globals: globals(sub_m)?,
            user_id,
            target,
        }));
    }

    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let signing_secret = matches
        .get_one::<String>("signing-secret")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --signing-secret")?;

    Ok(Action::Server(server::Args {
        port,
        globals: globals(matches)?,
        signing_secret,
        actions: actions_sink(matches)?,
    }))
}
