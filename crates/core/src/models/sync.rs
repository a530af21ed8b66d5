//! Sync pass outcomes and the persisted run records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which pass a run or lock belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Members,
    Groups,
    MigrateMembers,
    SingleMember,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Members => "members",
            SyncKind::Groups => "groups",
            SyncKind::MigrateMembers => "migrate_members",
            SyncKind::SingleMember => "single_member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "members" => Some(SyncKind::Members),
            "groups" => Some(SyncKind::Groups),
            "migrate_members" => Some(SyncKind::MigrateMembers),
            "single_member" => Some(SyncKind::SingleMember),
            _ => None,
        }
    }
}

/// What happened to one record during a pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Failed,
}

/// One human-readable line of a pass's progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub identifier: Option<String>,
    pub message: String,
}

/// Aggregate result of a completed pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOutcome {
    pub kind: SyncKind,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub failed: u64,
    pub cleanup_ran: bool,
    pub events: Vec<SyncEvent>,
}

impl SyncOutcome {
    pub fn new(kind: SyncKind) -> Self {
        Self {
            kind,
            created: 0,
            updated: 0,
            unchanged: 0,
            deleted: 0,
            failed: 0,
            cleanup_ran: false,
            events: Vec::new(),
        }
    }

    /// Count an event and append it to the log. Returns the stored event.
    pub fn record(
        &mut self,
        kind: SyncEventKind,
        identifier: Option<String>,
        message: impl Into<String>,
    ) -> &SyncEvent {
        match kind {
            SyncEventKind::Created => self.created += 1,
            SyncEventKind::Updated => self.updated += 1,
            SyncEventKind::Unchanged => self.unchanged += 1,
            SyncEventKind::Deleted => self.deleted += 1,
            SyncEventKind::Failed => self.failed += 1,
        }
        self.events.push(SyncEvent {
            kind,
            identifier,
            message: message.into(),
        });
        // just pushed
        &self.events[self.events.len() - 1]
    }

    /// Total records the pass looked at, deletions excluded.
    pub fn processed(&self) -> u64 {
        self.created + self.updated + self.unchanged + self.failed
    }

    /// The closing line printed after a pass.
    pub fn summary(&self) -> String {
        if self.kind == SyncKind::MigrateMembers {
            return format!("Done. Migrated {} Member records.", self.updated);
        }
        format!(
            "Done. Created {} records. Updated {} records. Deleted {} records.",
            self.created, self.updated, self.deleted
        )
    }
}

/// Status of a persisted sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SyncRunStatus::Running),
            "completed" => Some(SyncRunStatus::Completed),
            "failed" => Some(SyncRunStatus::Failed),
            _ => None,
        }
    }
}

/// Audit row written for every pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRun {
    pub id: String,
    pub kind: SyncKind,
    pub scope: String,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created: i64,
    pub updated: i64,
    pub unchanged: i64,
    pub deleted: i64,
    pub failed: i64,
    pub cleanup_ran: bool,
    pub error_details: Option<String>,
}

impl SyncRun {
    pub fn start(kind: SyncKind, scope: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            scope: scope.into(),
            status: SyncRunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            created: 0,
            updated: 0,
            unchanged: 0,
            deleted: 0,
            failed: 0,
            cleanup_ran: false,
            error_details: None,
        }
    }

    /// Mark the run completed with the pass's counts.
    pub fn complete(&mut self, outcome: &SyncOutcome) {
        self.status = SyncRunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.created = outcome.created as i64;
        self.updated = outcome.updated as i64;
        self.unchanged = outcome.unchanged as i64;
        self.deleted = outcome.deleted as i64;
        self.failed = outcome.failed as i64;
        self.cleanup_ran = outcome.cleanup_ran;
        let failures: Vec<&str> = outcome
            .events
            .iter()
            .filter(|e| e.kind == SyncEventKind::Failed)
            .map(|e| e.message.as_str())
            .collect();
        if !failures.is_empty() {
            self.error_details = Some(failures.join("\n"));
        }
    }

    /// Mark the run aborted.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = SyncRunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_details = Some(error.into());
    }
}

/// Lease on a sync scope, shared by every process using the same store.
///
/// A lease past `expires_at` belongs to a pass that died without releasing
/// it and may be taken over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLock {
    pub scope: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SyncLock {
    pub fn new(scope: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            scope: scope.into(),
            holder: uuid::Uuid::new_v4().to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
