pub mod init;
pub mod migrate_members;
pub mod schedule;
pub mod serve;
pub mod status;
pub mod sync_groups;
pub mod sync_members;

use std::path::Path;
use std::sync::Arc;

use dirsync_core::config::DirsyncConfig;
use dirsync_core::db::sqlite::SqliteRepository;
use dirsync_core::db::DatabasePool;
use dirsync_core::models::sync::SyncEvent;
use dirsync_ldap_sync::client::LdapDirectory;
use dirsync_ldap_sync::sync::DirectorySyncEngine;
use tracing::info;

/// Load and validate the configuration file.
pub fn load_config(config_path: &str) -> anyhow::Result<DirsyncConfig> {
    let config = DirsyncConfig::load(Path::new(config_path))?;
    config.validate()?;
    info!("Loaded configuration from {}", config_path);
    Ok(config)
}

/// Open the SQLite store named in the configuration, applying migrations.
pub async fn open_repository(config: &DirsyncConfig) -> anyhow::Result<Arc<SqliteRepository>> {
    let connect_str = format!("sqlite:{}?mode=rwc", config.dirsync.database.path);
    let pool = DatabasePool::new_sqlite(&connect_str).await?;
    Ok(Arc::new(pool.into_repository()))
}

/// A sync engine over the configured LDAP server that prints one line per record.
pub fn ldap_engine(
    config: &DirsyncConfig,
    repo: Arc<SqliteRepository>,
) -> anyhow::Result<DirectorySyncEngine<SqliteRepository, LdapDirectory>> {
    if !config.ldap.enabled {
        anyhow::bail!("LDAP sync is not enabled in configuration. Set ldap.enabled = true.");
    }
    let directory = Arc::new(LdapDirectory::new(&config.ldap));
    Ok(DirectorySyncEngine::new(repo, directory, config)
        .with_progress(Arc::new(|event: &SyncEvent| println!("{}", event.message))))
}
