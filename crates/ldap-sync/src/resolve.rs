//! Identity resolution: stable identifier to local principal.

use dirsync_core::db::repository::{GroupRepository, MemberRepository};
use dirsync_core::error::{DirsyncError, Result};
use dirsync_core::models::group::Group;
use dirsync_core::models::identifier::StableIdentifier;
use dirsync_core::models::member::Member;

/// A local principal found by identifier, or a fresh unsaved shell.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    Existing(T),
    New(T),
}

impl<T> Resolved<T> {
    pub fn is_new(&self) -> bool {
        matches!(self, Resolved::New(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Resolved::Existing(v) | Resolved::New(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Resolved::Existing(v) | Resolved::New(v) => v,
        }
    }
}

/// Find the member holding `identifier`, or a shell carrying only the identifier.
pub async fn resolve_member<R>(repo: &R, identifier: &StableIdentifier) -> Result<Resolved<Member>>
where
    R: MemberRepository + ?Sized,
{
    let mut found = repo.find_members_by_guid(identifier).await?;
    match found.len() {
        0 => Ok(Resolved::New(Member::shell(*identifier))),
        1 => Ok(Resolved::Existing(found.remove(0))),
        n => Err(duplicate("members", n, identifier)),
    }
}

/// Find the group holding `identifier`, or a shell carrying only the identifier.
pub async fn resolve_group<R>(repo: &R, identifier: &StableIdentifier) -> Result<Resolved<Group>>
where
    R: GroupRepository + ?Sized,
{
    let mut found = repo.find_groups_by_guid(identifier).await?;
    match found.len() {
        0 => Ok(Resolved::New(Group::shell(*identifier))),
        1 => Ok(Resolved::Existing(found.remove(0))),
        n => Err(duplicate("groups", n, identifier)),
    }
}

fn duplicate(what: &str, count: usize, identifier: &StableIdentifier) -> DirsyncError {
    DirsyncError::Config(format!(
        "{count} local {what} share identifier {identifier}; the local store must be repaired by hand"
    ))
}
