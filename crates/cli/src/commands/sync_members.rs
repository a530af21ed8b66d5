use dirsync_core::models::sync::SyncOutcome;
use tracing::info;

use super::{ldap_engine, load_config, open_repository};

/// Run the `sync-members` command: a full member pass, or one user by email.
pub async fn run(config_path: &str, email: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;
    let engine = ldap_engine(&config, repo)?;

    let outcome = match email {
        Some(email) => {
            info!(email, "Starting single member sync");
            engine.sync_member_by_email(email).await?
        }
        None => {
            info!(
                destructive = config.sync.destructive_members,
                "Starting member sync"
            );
            engine.sync_members().await?
        }
    };

    print_outcome(&outcome, config.sync.destructive_members && email.is_none());
    Ok(())
}

/// Closing lines shared by the sync commands.
pub fn print_outcome(outcome: &SyncOutcome, destructive: bool) {
    if outcome.failed > 0 {
        println!("{} records failed; see the lines above.", outcome.failed);
    }
    if destructive && !outcome.cleanup_ran {
        println!("Cleanup skipped: some directory entries could not be read.");
    }
    println!("{}", outcome.summary());
}
