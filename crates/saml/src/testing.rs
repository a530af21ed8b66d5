//! Directory stub shared by the crate's tests.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use dirsync_core::directory::{DirectoryService, EntryStream};
use dirsync_core::error::{DirsyncError, Result};
use dirsync_core::models::directory::RawEntry;
use dirsync_core::models::identifier::StableIdentifier;

/// Directory holding at most one user, reachable or not.
#[derive(Default)]
pub struct OneUserDirectory {
    pub user: Option<RawEntry>,
    pub password: Option<String>,
    pub down: bool,
}

impl OneUserDirectory {
    pub fn with_user(user: RawEntry) -> Self {
        Self {
            user: Some(user),
            ..Default::default()
        }
    }

    fn check(&self) -> Result<()> {
        if self.down {
            return Err(DirsyncError::RemoteUnavailable("connection refused".into()));
        }
        Ok(())
    }

    fn user_where(&self, attribute: &str, value: &str) -> Option<RawEntry> {
        self.user
            .iter()
            .find(|u| {
                u.first_text(attribute)
                    .map(|v| v.eq_ignore_ascii_case(value))
                    .unwrap_or(false)
            })
            .cloned()
    }
}

#[async_trait]
impl DirectoryService for OneUserDirectory {
    async fn enumerate_users(&self, _attributes: &[String]) -> Result<EntryStream<'_>> {
        self.check()?;
        Ok(stream::iter(self.user.clone().map(Ok)).boxed())
    }

    async fn enumerate_groups(&self, _attributes: &[String]) -> Result<EntryStream<'_>> {
        self.check()?;
        Ok(stream::empty().boxed())
    }

    async fn lookup_by_email(&self, email: &str, _attributes: &[String]) -> Result<Option<RawEntry>> {
        self.check()?;
        Ok(self.user_where("mail", email))
    }

    async fn lookup_by_username(
        &self,
        username: &str,
        _attributes: &[String],
    ) -> Result<Option<RawEntry>> {
        self.check()?;
        Ok(self.user_where("samaccountname", username))
    }

    async fn lookup_by_identifier(
        &self,
        _identifier: &StableIdentifier,
        _attributes: &[String],
    ) -> Result<Option<RawEntry>> {
        self.check()?;
        Ok(self.user.clone())
    }

    async fn authenticate(&self, dn: &str, password: &str) -> Result<bool> {
        self.check()?;
        let user_dn = self.user.as_ref().map(|u| u.dn.as_str());
        Ok(!password.is_empty()
            && user_dn == Some(dn)
            && self.password.as_deref() == Some(password))
    }
}
