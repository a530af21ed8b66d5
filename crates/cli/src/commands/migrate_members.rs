use tracing::info;

use super::{ldap_engine, load_config, open_repository};

/// Run the `migrate-members` command: link local members that predate the
/// directory sync to their directory user by email.
pub async fn run(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;
    let engine = ldap_engine(&config, repo)?;

    info!("Starting member migration");
    let outcome = engine.migrate_existing_members().await?;
    println!("{}", outcome.summary());
    Ok(())
}
