use dirsync_core::config::DirsyncConfig;
use dirsync_core::db::repository::{GroupRepository, MemberRepository, SyncRunRepository};
use dirsync_core::db::sqlite::SqliteRepository;
use dirsync_core::models::sync::{SyncKind, SyncRun};
use dirsync_ldap_sync::client::LdapDirectory;

use super::{load_config, open_repository};

const KINDS: [SyncKind; 4] = [
    SyncKind::Members,
    SyncKind::Groups,
    SyncKind::SingleMember,
    SyncKind::MigrateMembers,
];

/// Run the `status` command: show the last run of each pass and local counts.
pub async fn run(config_path: &str, check_ldap: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;

    let db_size = std::fs::metadata(&config.dirsync.database.path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());

    println!("dirsync Status");
    println!("==============");
    println!("Instance: {}", config.dirsync.instance_name);
    println!("Database: {} ({})", config.dirsync.database.path, db_size);
    print_settings(&config);
    println!();

    for kind in KINDS {
        match repo.get_latest_sync_run(kind).await? {
            Some(run) => print_run(&run),
            None => {
                println!("Last {} run: never", kind.as_str());
                println!();
            }
        }
    }

    print_counts(&repo).await?;

    if check_ldap {
        println!();
        if !config.ldap.enabled {
            anyhow::bail!("LDAP sync is not enabled in configuration. Set ldap.enabled = true.");
        }
        LdapDirectory::new(&config.ldap).test_connection().await?;
        println!("LDAP connection OK: {}", config.ldap.connection.server);
    }

    Ok(())
}

fn print_settings(config: &DirsyncConfig) {
    println!(
        "LDAP:     {}",
        if config.ldap.enabled {
            config.ldap.connection.server.as_str()
        } else {
            "disabled"
        }
    );
    println!(
        "SAML:     {}",
        if config.saml.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "Cleanup:  members {}, groups {}",
        on_off(config.sync.destructive_members),
        on_off(config.sync.destructive_groups)
    );
    match config.sync.regenerate_time_secs {
        Some(secs) => println!("Schedule: every {secs} s"),
        None => println!("Schedule: not configured"),
    }
}

fn print_run(run: &SyncRun) {
    println!("Last {} run", run.kind.as_str());
    println!("  Scope:     {}", run.scope);
    println!("  Status:    {}", run.status.as_str());
    println!(
        "  Started:   {}",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(completed) = run.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "  Created {} / Updated {} / Unchanged {} / Deleted {} / Failed {}",
        run.created, run.updated, run.unchanged, run.deleted, run.failed
    );
    if let Some(ref details) = run.error_details {
        println!("  Errors:");
        for line in details.lines() {
            println!("    {}", line);
        }
    }
    println!();
}

async fn print_counts(repo: &SqliteRepository) -> anyhow::Result<()> {
    let members = repo.count_members().await?;
    let groups = repo.list_groups().await?;
    let linked = groups.iter().filter(|g| g.guid.is_some()).count();
    println!("Local Counts");
    println!("------------");
    println!("Members: {}", members);
    println!("Groups:  {} ({} from the directory)", groups.len(), linked);
    Ok(())
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
