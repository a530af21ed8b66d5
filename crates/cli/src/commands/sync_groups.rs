use tracing::info;

use super::sync_members::print_outcome;
use super::{ldap_engine, load_config, open_repository};

/// Run the `sync-groups` command.
pub async fn run(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;
    let engine = ldap_engine(&config, repo)?;

    info!(
        destructive = config.sync.destructive_groups,
        "Starting group sync"
    );
    let outcome = engine.sync_groups().await?;
    print_outcome(&outcome, config.sync.destructive_groups);
    Ok(())
}
