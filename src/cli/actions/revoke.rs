use crate::{cli::globals::GlobalArgs, sessions::password::derive_user_hash};
use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::info;

use super::session_manager;

/// Which index entry to revoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    UserHash(String),
    /// Account creation timestamp; the hash is derived from it.
    Created(i64),
}

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub user_id: i64,
    pub target: Target,
}

fn user_hash(user_id: i64, target: &Target) -> Result<String> {
    match target {
        Target::UserHash(hash) => Ok(hash.clone()),
        Target::Created(created) => {
            derive_user_hash(user_id, *created).context("Failed to derive user hash")
        }
    }
}

/// Execute the revoke action.
/// # Errors
/// Returns an error if a store cannot be reached or a deletion fails.
pub async fn execute(args: Args) -> Result<()> {
    let user_hash = user_hash(args.user_id, &args.target)?;

    // Revocation never signs tokens.
    let manager = session_manager(&args.globals, &SecretString::default()).await?;

    let deleted = manager
        .delete_all_by_user_hash(&user_hash, args.user_id)
        .await
        .context("Failed to revoke sessions")?;

    info!(user_id = args.user_id, deleted, "sessions revoked");
    println!("{deleted}");

    Ok(())
}
