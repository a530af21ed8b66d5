use std::path::Path;

use dirsync_core::config::DirsyncConfig;
use tracing::info;

/// Run the `init` command: write a default configuration file.
pub async fn run(output: &str, force: bool) -> anyhow::Result<()> {
    let path = Path::new(output);
    if path.exists() && !force {
        anyhow::bail!("{output} already exists; pass --force to overwrite it");
    }

    let config = DirsyncConfig::generate_default();
    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    info!("Wrote default configuration to {}", output);

    println!("Configuration written to {output}");
    println!();
    println!("Next steps:");
    println!("  1. Set dirsync.base_url and the [ldap.connection] settings");
    println!("  2. Set ldap.enabled = true");
    println!("  3. Run `dirsync migrate-members` once if members already exist locally");
    println!("  4. Run `dirsync sync-members`");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_loadable_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirsync.toml");
        let output = path.to_str().unwrap();

        run(output, false).await.unwrap();
        let loaded = DirsyncConfig::load(&path).unwrap();
        assert_eq!(loaded.dirsync.instance_name, "My Site");
        assert_eq!(
            loaded.ldap.users.field_mappings,
            DirsyncConfig::generate_default().ldap.users.field_mappings
        );
        loaded.validate().unwrap();
    }

    #[tokio::test]
    async fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirsync.toml");
        std::fs::write(&path, "# existing").unwrap();
        let output = path.to_str().unwrap();

        assert!(run(output, false).await.is_err());
        run(output, true).await.unwrap();
        assert!(DirsyncConfig::load(&path).is_ok());
    }
}
