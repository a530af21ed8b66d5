//! Per-scope mutual exclusion for sync passes.
//!
//! Leases live in the local store, so a scheduled pass and a manual
//! `sync-members` started from another process exclude each other.

use chrono::Duration;
use tracing::{debug, warn};

use dirsync_core::db::repository::SyncLockRepository;
use dirsync_core::error::{DirsyncError, Result};
use dirsync_core::models::sync::SyncLock;

/// Longest lease honored, whatever the configuration says.
const MAX_LEASE_SECS: u64 = 7 * 24 * 60 * 60;

/// Lease length for `sync.lock_ttl_secs`.
pub fn lease_ttl(secs: u64) -> Duration {
    Duration::seconds(secs.clamp(1, MAX_LEASE_SECS) as i64)
}

/// A held scope. Give it back with [`release`]; a lease that is never
/// released expires on its own.
#[derive(Debug)]
#[must_use = "a lease that is not released blocks its scope until it expires"]
pub struct ScopeLease {
    lock: SyncLock,
}

impl ScopeLease {
    pub fn scope(&self) -> &str {
        &self.lock.scope
    }

    pub fn holder(&self) -> &str {
        &self.lock.holder
    }
}

/// Claim `scope`, failing fast with `SyncInProgress` if another pass in any
/// process holds an unexpired lease on it.
pub async fn acquire<R>(repo: &R, scope: &str, ttl: Duration) -> Result<ScopeLease>
where
    R: SyncLockRepository + ?Sized,
{
    let lock = SyncLock::new(scope, ttl);
    if !repo.try_acquire_sync_lock(&lock).await? {
        return Err(DirsyncError::SyncInProgress(scope.to_string()));
    }
    debug!(scope = %scope, holder = %lock.holder, "scope lease acquired");
    Ok(ScopeLease { lock })
}

/// Give the scope back. A failure only leaves the lease to expire.
pub async fn release<R>(repo: &R, lease: ScopeLease)
where
    R: SyncLockRepository + ?Sized,
{
    match repo
        .release_sync_lock(&lease.lock.scope, &lease.lock.holder)
        .await
    {
        Ok(true) => debug!(scope = %lease.lock.scope, "scope lease released"),
        Ok(false) => warn!(
            scope = %lease.lock.scope,
            "scope lease was taken over before release; the pass outlived sync.lock_ttl_secs"
        ),
        Err(e) => warn!(scope = %lease.lock.scope, error = %e, "failed to release scope lease"),
    }
}
