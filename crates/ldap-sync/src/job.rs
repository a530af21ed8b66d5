//! Self-rescheduling member pass.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use dirsync_core::config::DirsyncConfig;
use dirsync_core::db::repository::DirsyncRepository;
use dirsync_core::directory::DirectoryService;
use dirsync_core::error::{DirsyncError, Result};
use dirsync_core::models::sync::{SyncKind, SyncOutcome};

use crate::sync::DirectorySyncEngine;

/// Re-runs the member pass every `sync.regenerate_time_secs`.
pub struct RegenerateJob<R, D>
where
    R: DirsyncRepository,
    D: DirectoryService + ?Sized,
{
    engine: Arc<DirectorySyncEngine<R, D>>,
    repo: Arc<R>,
    interval: Duration,
}

impl<R, D> RegenerateJob<R, D>
where
    R: DirsyncRepository,
    D: DirectoryService + ?Sized,
{
    /// `None` when no interval is configured. Intervals under the floor are
    /// rejected before any work is done.
    pub fn from_config(
        engine: Arc<DirectorySyncEngine<R, D>>,
        repo: Arc<R>,
        config: &DirsyncConfig,
    ) -> Result<Option<Self>> {
        config.validate_regenerate_time()?;
        let Some(secs) = config.sync.regenerate_time_secs else {
            return Ok(None);
        };
        let secs = i64::try_from(secs)
            .map_err(|_| DirsyncError::Config(format!("regenerate interval too large: {secs}")))?;
        Ok(Some(Self {
            engine,
            repo,
            interval: Duration::seconds(secs),
        }))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the next member pass is due; `None` if one has never run.
    pub async fn next_run_at(&self) -> Result<Option<DateTime<Utc>>> {
        let last = self.repo.get_latest_sync_run(SyncKind::Members).await?;
        Ok(last.map(|run| run.started_at + self.interval))
    }

    /// How long to wait from `now` until the next pass is due.
    pub async fn delay_from(&self, now: DateTime<Utc>) -> Result<std::time::Duration> {
        let wait = match self.next_run_at().await? {
            Some(at) if at > now => (at - now).to_std().unwrap_or_default(),
            _ => std::time::Duration::ZERO,
        };
        Ok(wait)
    }

    /// Run the member pass if it is due at `now`.
    ///
    /// A pass already holding the member scope is not an error here; the
    /// tick is skipped and retried on the next one.
    pub async fn run_if_due(&self, now: DateTime<Utc>) -> Result<Option<SyncOutcome>> {
        if let Some(at) = self.next_run_at().await? {
            if at > now {
                return Ok(None);
            }
        }
        match self.engine.sync_members().await {
            Ok(outcome) => {
                info!(
                    created = outcome.created,
                    updated = outcome.updated,
                    deleted = outcome.deleted,
                    failed = outcome.failed,
                    next_in_secs = self.interval.num_seconds(),
                    "scheduled member pass finished"
                );
                Ok(Some(outcome))
            }
            Err(DirsyncError::SyncInProgress(scope)) => {
                warn!(%scope, "member pass already running, skipping this tick");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
