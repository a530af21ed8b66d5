use std::process::ExitCode;

use clap::Parser;
use dirsync_core::error::DirsyncError;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "dirsync",
    about = "Directory sync and SAML login bridge",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "dirsync.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Where to write the configuration
        #[arg(long, default_value = "dirsync.toml")]
        output: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Sync directory users into local members
    SyncMembers {
        /// Sync only the user with this email address
        #[arg(long)]
        email: Option<String>,
    },
    /// Sync directory groups into local groups
    SyncGroups,
    /// Link existing local members to directory users by email
    MigrateMembers,
    /// Show sync history and local counts
    Status {
        /// Also test the LDAP connection
        #[arg(long)]
        check_ldap: bool,
    },
    /// Re-run the member sync every `sync.regenerate_time_secs`
    Schedule,
    /// Start the SAML and directory login endpoints
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { output, force } => commands::init::run(&output, force).await,
        Commands::SyncMembers { email } => {
            commands::sync_members::run(&cli.config, email.as_deref()).await
        }
        Commands::SyncGroups => commands::sync_groups::run(&cli.config).await,
        Commands::MigrateMembers => commands::migrate_members::run(&cli.config).await,
        Commands::Status { check_ldap } => commands::status::run(&cli.config, check_ldap).await,
        Commands::Schedule => commands::schedule::run(&cli.config).await,
        Commands::Serve { port } => commands::serve::run(&cli.config, port).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

/// `2` for bad input, `1` for everything else.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<DirsyncError>() {
        Some(DirsyncError::InvalidInput(_)) => 2,
        _ => 1,
    }
}
