use std::sync::Arc;

use chrono::Utc;
use dirsync_ldap_sync::job::RegenerateJob;
use tracing::{error, info};

use super::sync_members::print_outcome;
use super::{ldap_engine, load_config, open_repository};

/// Run the `schedule` command: repeat the member pass every
/// `sync.regenerate_time_secs` until interrupted.
pub async fn run(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;
    let engine = Arc::new(ldap_engine(&config, repo.clone())?);

    let Some(job) = RegenerateJob::from_config(engine, repo, &config)? else {
        anyhow::bail!("sync.regenerate_time_secs is not set; nothing to schedule");
    };
    info!(
        interval_secs = job.interval().num_seconds(),
        "Member sync scheduled"
    );

    loop {
        match job.run_if_due(Utc::now()).await {
            Ok(Some(outcome)) => print_outcome(&outcome, config.sync.destructive_members),
            Ok(None) => {}
            // a failed pass is retried on the next tick
            Err(e) => error!(error = %e, "Scheduled member sync failed"),
        }

        let wait = job.delay_from(Utc::now()).await?;
        let wait = if wait.is_zero() {
            job.interval().to_std()?
        } else {
            wait
        };
        info!(wait_secs = wait.as_secs(), "Waiting for next member sync");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
        }
    }
}
