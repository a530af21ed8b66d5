//! Sync engine: member, group and migration passes over the directory.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use dirsync_core::config::{DirsyncConfig, LdapConfig, SyncConfig};
use dirsync_core::db::repository::DirsyncRepository;
use dirsync_core::directory::DirectoryService;
use dirsync_core::error::{DirsyncError, Result};
use dirsync_core::models::directory::{DirectoryRecord, RawEntry};
use dirsync_core::models::identifier::StableIdentifier;
use dirsync_core::models::sync::{SyncEvent, SyncEventKind, SyncKind, SyncOutcome, SyncRun};

use crate::lock::{self, lease_ttl};
use crate::normalize::Normalizer;
use crate::record::{sync_group_record, sync_member_record, RecordOutcome};

/// Called with every event as it is recorded.
pub type ProgressFn = dyn Fn(&SyncEvent) + Send + Sync;

/// Reconciles the directory with the local store.
pub struct DirectorySyncEngine<R, D>
where
    R: DirsyncRepository,
    D: DirectoryService + ?Sized,
{
    repo: Arc<R>,
    directory: Arc<D>,
    ldap: LdapConfig,
    sync: SyncConfig,
    normalizer: Normalizer,
    progress: Option<Arc<ProgressFn>>,
}

impl<R, D> DirectorySyncEngine<R, D>
where
    R: DirsyncRepository,
    D: DirectoryService + ?Sized,
{
    pub fn new(repo: Arc<R>, directory: Arc<D>, config: &DirsyncConfig) -> Self {
        Self {
            repo,
            directory,
            normalizer: Normalizer::new(&config.ldap.users),
            ldap: config.ldap.clone(),
            sync: config.sync.clone(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Lock key for a pass. Every member-writing pass shares the member scope.
    pub fn scope(&self, kind: SyncKind) -> String {
        match kind {
            SyncKind::Groups => format!("groups:{}", self.ldap.group_search_base().to_lowercase()),
            SyncKind::Members | SyncKind::MigrateMembers | SyncKind::SingleMember => {
                format!("members:{}", self.ldap.user_search_base().to_lowercase())
            }
        }
    }

    /// Full member pass, with destructive cleanup when enabled.
    pub async fn sync_members(&self) -> Result<SyncOutcome> {
        self.run_pass(SyncKind::Members, || self.execute_member_pass())
            .await
    }

    /// Full group pass, with destructive cleanup when enabled.
    pub async fn sync_groups(&self) -> Result<SyncOutcome> {
        self.run_pass(SyncKind::Groups, || self.execute_group_pass())
            .await
    }

    /// Sync exactly one directory user, found by email.
    pub async fn sync_member_by_email(&self, email: &str) -> Result<SyncOutcome> {
        let email = email.trim();
        if email.is_empty() {
            return Err(DirsyncError::InvalidInput(
                "an email address is required".into(),
            ));
        }
        self.run_pass(SyncKind::SingleMember, || self.execute_single(email))
            .await
    }

    /// Link existing local members with no identifier to directory users by email.
    pub async fn migrate_existing_members(&self) -> Result<SyncOutcome> {
        self.run_pass(SyncKind::MigrateMembers, || self.execute_migration())
            .await
    }

    /// Re-read one user by identifier and apply it, outside any pass.
    ///
    /// Used after a login. `None` when the directory has no such user.
    pub async fn refresh_member(
        &self,
        identifier: &StableIdentifier,
    ) -> Result<Option<RecordOutcome>> {
        let attributes = self.user_attributes();
        let Some(entry) = self
            .directory
            .lookup_by_identifier(identifier, &attributes)
            .await?
        else {
            return Ok(None);
        };
        let record = self.normalizer.user(&entry)?;
        if record.identifier != *identifier {
            return Err(DirsyncError::Config(format!(
                "directory returned {} when asked for {identifier}",
                record.identifier
            )));
        }
        let applied = self.apply_user_record(&record).await?;
        debug!(identifier = %identifier, member_id = applied.id(), "member refreshed from directory");
        Ok(Some(applied))
    }

    /// Normalize one user entry fetched outside a pass and apply it.
    pub async fn apply_user_entry(&self, entry: &RawEntry) -> Result<RecordOutcome> {
        let record = self.normalizer.user(entry)?;
        self.apply_user_record(&record).await
    }

    async fn apply_user_record(&self, record: &DirectoryRecord) -> Result<RecordOutcome> {
        let mappings = self.repo.list_group_mappings().await?;
        sync_member_record(self.repo.as_ref(), &mappings, record).await
    }

    pub fn directory(&self) -> &D {
        self.directory.as_ref()
    }

    pub fn repository(&self) -> &R {
        self.repo.as_ref()
    }

    /// Attributes requested for every user lookup.
    pub fn user_attributes(&self) -> Vec<String> {
        self.ldap.user_attributes()
    }

    /// Hold the pass's scope lease and record a run around `execute`.
    async fn run_pass<F, Fut>(&self, kind: SyncKind, execute: F) -> Result<SyncOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SyncOutcome>>,
    {
        let lease = lock::acquire(
            self.repo.as_ref(),
            &self.scope(kind),
            lease_ttl(self.sync.lock_ttl_secs),
        )
        .await?;
        let result = self.record_run(kind, execute).await;
        lock::release(self.repo.as_ref(), lease).await;
        result
    }

    async fn record_run<F, Fut>(&self, kind: SyncKind, execute: F) -> Result<SyncOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SyncOutcome>>,
    {
        let mut run = self.begin_run(kind).await?;
        let result = execute().await;
        self.finish_run(&mut run, &result).await?;
        result
    }

    async fn begin_run(&self, kind: SyncKind) -> Result<SyncRun> {
        let run = SyncRun::start(kind, self.scope(kind));
        self.repo.create_sync_run(&run).await?;
        info!(run_id = %run.id, kind = kind.as_str(), scope = %run.scope, "sync pass started");
        Ok(run)
    }

    async fn finish_run(&self, run: &mut SyncRun, result: &Result<SyncOutcome>) -> Result<()> {
        match result {
            Ok(outcome) => {
                run.complete(outcome);
                info!(
                    run_id = %run.id,
                    kind = run.kind.as_str(),
                    created = outcome.created,
                    updated = outcome.updated,
                    unchanged = outcome.unchanged,
                    deleted = outcome.deleted,
                    failed = outcome.failed,
                    cleanup_ran = outcome.cleanup_ran,
                    "sync pass completed"
                );
            }
            Err(e) => {
                run.fail(e.to_string());
                error!(run_id = %run.id, kind = run.kind.as_str(), error = %e, "sync pass aborted");
            }
        }
        self.repo.update_sync_run(run).await
    }

    fn record(
        &self,
        outcome: &mut SyncOutcome,
        kind: SyncEventKind,
        identifier: Option<String>,
        message: String,
    ) {
        let event = outcome.record(kind, identifier, message);
        if let Some(progress) = &self.progress {
            progress(event);
        }
    }

    fn record_failure(
        &self,
        outcome: &mut SyncOutcome,
        identifier: Option<&StableIdentifier>,
        subject: &str,
        operation: &str,
        err: &DirsyncError,
    ) {
        let who = identifier
            .map(|id| id.to_string())
            .unwrap_or_else(|| subject.to_string());
        warn!(identifier = %who, operation, error = %err, "record skipped");
        self.record(
            outcome,
            SyncEventKind::Failed,
            identifier.map(|id| id.to_string()),
            format!("Failed to {operation} {who}: {err}"),
        );
    }

    fn record_member_outcome(
        &self,
        outcome: &mut SyncOutcome,
        record: &DirectoryRecord,
        applied: RecordOutcome,
    ) {
        let identifier = record.identifier.to_string();
        let account = record.account_name.as_deref().unwrap_or("-");
        let (kind, message) = match applied {
            RecordOutcome::Created { id, name } => (
                SyncEventKind::Created,
                format!(
                    "Created new member {identifier}: \"{name}\" (ID: {id}, account name: {account})"
                ),
            ),
            RecordOutcome::Updated { id, name } => (
                SyncEventKind::Updated,
                format!(
                    "Updated existing member {identifier}: \"{name}\" (ID: {id}, account name: {account})"
                ),
            ),
            RecordOutcome::Unchanged { id, name } => (
                SyncEventKind::Unchanged,
                format!("Member {identifier}: \"{name}\" (ID: {id}) is up to date"),
            ),
        };
        debug!(identifier = %identifier, ?kind, "member applied");
        self.record(outcome, kind, Some(identifier), message);
    }

    async fn execute_member_pass(&self) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::new(SyncKind::Members);
        let mappings = self.repo.list_group_mappings().await?;
        let attributes = self.ldap.user_attributes();

        let mut observed: HashSet<StableIdentifier> = HashSet::new();
        let mut undecodable = 0usize;

        let mut entries = self.directory.enumerate_users(&attributes).await?;
        while let Some(entry) = entries.next().await {
            // a failed read ends the pass before cleanup
            let entry = entry?;
            let record = match self.normalizer.user(&entry) {
                Ok(record) => record,
                Err(e) => {
                    undecodable += 1;
                    self.record_failure(&mut outcome, None, &entry.dn, "read", &e);
                    continue;
                }
            };
            observed.insert(record.identifier);

            match sync_member_record(self.repo.as_ref(), &mappings, &record).await {
                Ok(applied) => self.record_member_outcome(&mut outcome, &record, applied),
                Err(e) if e.is_record_level() => {
                    self.record_failure(&mut outcome, Some(&record.identifier), &record.dn, "sync member", &e)
                }
                Err(e) => return Err(e),
            }
        }
        drop(entries);

        if self.sync.destructive_members {
            if undecodable > 0 {
                warn!(
                    undecodable,
                    "skipping member cleanup: some directory entries had unreadable identifiers"
                );
            } else {
                self.cleanup_members(&observed, &mut outcome).await?;
            }
        }
        Ok(outcome)
    }

    async fn cleanup_members(
        &self,
        observed: &HashSet<StableIdentifier>,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        for (id, identifier) in self.repo.list_member_identifiers().await? {
            if observed.contains(&identifier) {
                continue;
            }
            match self.repo.delete_member(id).await {
                Ok(true) => {
                    info!(member_id = id, identifier = %identifier, "member removed");
                    self.record(
                        outcome,
                        SyncEventKind::Deleted,
                        Some(identifier.to_string()),
                        format!(
                            "Removed member {id} ({identifier}) that no longer exists in the directory"
                        ),
                    );
                }
                Ok(false) => {}
                Err(e) if e.is_record_level() => {
                    self.record_failure(outcome, Some(&identifier), "", "remove member", &e)
                }
                Err(e) => return Err(e),
            }
        }
        outcome.cleanup_ran = true;
        Ok(())
    }

    async fn execute_group_pass(&self) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::new(SyncKind::Groups);
        let attributes = self.ldap.group_attributes();

        let mut observed: HashSet<StableIdentifier> = HashSet::new();
        let mut undecodable = 0usize;

        let mut entries = self.directory.enumerate_groups(&attributes).await?;
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            let record = match self.normalizer.group(&entry) {
                Ok(record) => record,
                Err(e) => {
                    undecodable += 1;
                    self.record_failure(&mut outcome, None, &entry.dn, "read", &e);
                    continue;
                }
            };
            observed.insert(record.identifier);

            let identifier = record.identifier.to_string();
            let account = record.account_name.as_deref().unwrap_or("-");
            match sync_group_record(self.repo.as_ref(), &record).await {
                Ok(RecordOutcome::Created { id, name }) => self.record(
                    &mut outcome,
                    SyncEventKind::Created,
                    Some(identifier.clone()),
                    format!("Created new group \"{name}\" (ID: {id}, GUID: {identifier}, account name: {account})"),
                ),
                Ok(RecordOutcome::Updated { id, name }) => self.record(
                    &mut outcome,
                    SyncEventKind::Updated,
                    Some(identifier.clone()),
                    format!("Updated existing group \"{name}\" (ID: {id}, GUID: {identifier}, account name: {account})"),
                ),
                Ok(RecordOutcome::Unchanged { id, name }) => self.record(
                    &mut outcome,
                    SyncEventKind::Unchanged,
                    Some(identifier.clone()),
                    format!("Group \"{name}\" (ID: {id}) is up to date"),
                ),
                Err(e) if e.is_record_level() => {
                    self.record_failure(&mut outcome, Some(&record.identifier), &record.dn, "sync group", &e)
                }
                Err(e) => return Err(e),
            }
        }
        drop(entries);

        if self.sync.destructive_groups {
            if undecodable > 0 {
                warn!(
                    undecodable,
                    "skipping group cleanup: some directory entries had unreadable identifiers"
                );
            } else {
                self.cleanup_groups(&observed, &mut outcome).await?;
            }
        }
        Ok(outcome)
    }

    async fn cleanup_groups(
        &self,
        observed: &HashSet<StableIdentifier>,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        for (id, identifier) in self.repo.list_group_identifiers().await? {
            if observed.contains(&identifier) {
                continue;
            }
            match self.repo.delete_group(id).await {
                Ok(true) => {
                    info!(group_id = id, identifier = %identifier, "group removed");
                    self.record(
                        outcome,
                        SyncEventKind::Deleted,
                        Some(identifier.to_string()),
                        format!(
                            "Removed group {id} ({identifier}) that no longer exists in the directory"
                        ),
                    );
                }
                Ok(false) => {}
                Err(e) if e.is_record_level() => {
                    self.record_failure(outcome, Some(&identifier), "", "remove group", &e)
                }
                Err(e) => return Err(e),
            }
        }
        outcome.cleanup_ran = true;
        Ok(())
    }

    async fn execute_single(&self, email: &str) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::new(SyncKind::SingleMember);
        let attributes = self.ldap.user_attributes();
        let entry = self
            .directory
            .lookup_by_email(email, &attributes)
            .await?
            .ok_or_else(|| {
                DirsyncError::NotFound(format!("no directory user found for email {email}"))
            })?;
        debug!(dn = %entry.dn, attributes = ?entry.attribute_names().collect::<Vec<_>>(), "directory user found");

        let record = self.normalizer.user(&entry)?;
        let mappings = self.repo.list_group_mappings().await?;
        let applied = sync_member_record(self.repo.as_ref(), &mappings, &record).await?;
        self.record_member_outcome(&mut outcome, &record, applied);
        Ok(outcome)
    }

    async fn execute_migration(&self) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::new(SyncKind::MigrateMembers);
        let attributes = vec![
            self.normalizer.identifier_attribute().to_string(),
            "mail".to_string(),
        ];

        let mut entries = self.directory.enumerate_users(&attributes).await?;
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            let Some(email) = entry.first_text("mail").filter(|m| !m.trim().is_empty()) else {
                continue;
            };
            let identifier = match self.normalizer.identifier(&entry) {
                Ok(identifier) => identifier,
                Err(e) => {
                    self.record_failure(&mut outcome, None, &entry.dn, "read", &e);
                    continue;
                }
            };
            let Some(mut member) = self.repo.find_unlinked_member_by_email(email.trim()).await?
            else {
                continue;
            };

            member.guid = Some(identifier);
            member.updated_at = chrono::Utc::now();
            match self.repo.update_member(&member).await {
                Ok(()) => {
                    let id = member.id.unwrap_or_default();
                    info!(member_id = id, identifier = %identifier, "member linked to directory");
                    self.record(
                        &mut outcome,
                        SyncEventKind::Updated,
                        Some(identifier.to_string()),
                        format!(
                            "Migrated member {} (ID: {id}, email: {})",
                            member.name(),
                            email.trim()
                        ),
                    );
                }
                Err(e) if e.is_record_level() => {
                    self.record_failure(&mut outcome, Some(&identifier), &entry.dn, "migrate member", &e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }
}
