//! The directory collaborator the sync engine reads from.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::directory::RawEntry;
use crate::models::identifier::StableIdentifier;

/// Lazily produced directory entries. An `Err` item ends the enumeration.
pub type EntryStream<'a> = BoxStream<'a, Result<RawEntry>>;

/// Read-only access to a remote directory.
///
/// Attribute names passed in and returned are lower-case.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Stream every user entry under the configured search base.
    async fn enumerate_users(&self, attributes: &[String]) -> Result<EntryStream<'_>>;

    /// Stream every group entry under the configured search base.
    async fn enumerate_groups(&self, attributes: &[String]) -> Result<EntryStream<'_>>;

    /// Fetch a single user by email address.
    async fn lookup_by_email(&self, email: &str, attributes: &[String]) -> Result<Option<RawEntry>>;

    /// Fetch a single user by account name (`sAMAccountName`).
    async fn lookup_by_username(
        &self,
        username: &str,
        attributes: &[String],
    ) -> Result<Option<RawEntry>>;

    /// Fetch a single user by stable identifier.
    async fn lookup_by_identifier(
        &self,
        identifier: &StableIdentifier,
        attributes: &[String],
    ) -> Result<Option<RawEntry>>;

    /// Check a password by binding as `dn`. `Ok(false)` means the directory
    /// rejected the credentials; other failures are errors.
    async fn authenticate(&self, dn: &str, password: &str) -> Result<bool>;
}
