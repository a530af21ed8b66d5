use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    group::{Group, GroupMapping},
    identifier::StableIdentifier,
    member::Member,
    session::LoginSession,
    sync::{SyncKind, SyncLock, SyncRun},
};

#[async_trait]
pub trait MemberRepository: Send + Sync {
    /// All members holding `guid`. More than one row means the store is corrupt.
    async fn find_members_by_guid(&self, guid: &StableIdentifier) -> Result<Vec<Member>>;
    async fn get_member(&self, id: i64) -> Result<Option<Member>>;
    async fn find_member_by_email(&self, email: &str) -> Result<Option<Member>>;
    /// A member with this email that has never been linked to the directory.
    async fn find_unlinked_member_by_email(&self, email: &str) -> Result<Option<Member>>;
    async fn insert_member(&self, member: &Member) -> Result<i64>;
    async fn update_member(&self, member: &Member) -> Result<()>;
    /// Insert (no id) or update `member` and apply membership changes in one
    /// transaction. Returns the member id.
    async fn save_member_with_groups(
        &self,
        member: &Member,
        add_groups: &[i64],
        remove_groups: &[i64],
    ) -> Result<i64>;
    /// Delete a member and its group memberships.
    async fn delete_member(&self, id: i64) -> Result<bool>;
    async fn list_member_identifiers(&self) -> Result<Vec<(i64, StableIdentifier)>>;
    async fn count_members(&self) -> Result<i64>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn find_groups_by_guid(&self, guid: &StableIdentifier) -> Result<Vec<Group>>;
    async fn get_group(&self, id: i64) -> Result<Option<Group>>;
    async fn insert_group(&self, group: &Group) -> Result<i64>;
    async fn update_group(&self, group: &Group) -> Result<()>;
    /// Delete a group, its mappings and its memberships.
    async fn delete_group(&self, id: i64) -> Result<bool>;
    async fn list_group_identifiers(&self) -> Result<Vec<(i64, StableIdentifier)>>;
    async fn list_groups(&self) -> Result<Vec<Group>>;
}

#[async_trait]
pub trait GroupMappingRepository: Send + Sync {
    async fn list_group_mappings(&self) -> Result<Vec<GroupMapping>>;
    async fn insert_group_mapping(&self, mapping: &GroupMapping) -> Result<i64>;
    async fn delete_group_mapping(&self, id: i64) -> Result<bool>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn list_group_ids_for_member(&self, member_id: i64) -> Result<Vec<i64>>;
    async fn add_membership(&self, member_id: i64, group_id: i64) -> Result<()>;
    async fn remove_membership(&self, member_id: i64, group_id: i64) -> Result<bool>;
}

#[async_trait]
pub trait LoginSessionRepository: Send + Sync {
    async fn create_login_session(&self, session: &LoginSession) -> Result<()>;
    async fn get_login_session(&self, id: &str) -> Result<Option<LoginSession>>;
    async fn delete_login_session(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    async fn create_sync_run(&self, run: &SyncRun) -> Result<()>;
    async fn update_sync_run(&self, run: &SyncRun) -> Result<()>;
    async fn get_sync_run(&self, id: &str) -> Result<Option<SyncRun>>;
    async fn get_latest_sync_run(&self, kind: SyncKind) -> Result<Option<SyncRun>>;
    async fn list_sync_runs(&self, limit: i64) -> Result<Vec<SyncRun>>;
}

#[async_trait]
pub trait SyncLockRepository: Send + Sync {
    /// Store `lock` unless an unexpired lease on its scope exists. Returns
    /// whether the caller now holds the scope.
    async fn try_acquire_sync_lock(&self, lock: &SyncLock) -> Result<bool>;
    /// Drop the lease if `holder` still owns it.
    async fn release_sync_lock(&self, scope: &str, holder: &str) -> Result<bool>;
    async fn get_sync_lock(&self, scope: &str) -> Result<Option<SyncLock>>;
}

/// Everything the sync engine and assertion consumer need from the local store.
pub trait DirsyncRepository:
    MemberRepository
    + GroupRepository
    + GroupMappingRepository
    + MembershipRepository
    + LoginSessionRepository
    + SyncRunRepository
    + SyncLockRepository
{
}
