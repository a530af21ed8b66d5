//! Fixtures shared by this crate's tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use dirsync_core::db::sqlite::SqliteRepository;
use dirsync_core::db::DatabasePool;
use dirsync_core::directory::{DirectoryService, EntryStream};
use dirsync_core::error::{DirsyncError, Result};
use dirsync_core::models::directory::{AttributeValue, RawEntry};
use dirsync_core::models::identifier::StableIdentifier;

/// Sixteen non-printable bytes distinguished by `n`.
pub fn guid_bytes(n: u8) -> [u8; 16] {
    let mut bytes = [
        0xABu8, 0xCD, 0xEF, 0x01, 0x80, 0x81, 0x82, 0x83, 0x90, 0x91, 0x92, 0x93, 0xA0, 0xA1,
        0xA2, 0x00,
    ];
    bytes[15] = n;
    bytes
}

pub fn guid(n: u8) -> StableIdentifier {
    StableIdentifier::from_wire_bytes(&guid_bytes(n)).unwrap()
}

pub fn user_entry(n: u8, cn: &str, sam: &str) -> RawEntry {
    RawEntry::new(format!("CN={cn},OU=Staff,DC=example,DC=com"))
        .with_binary("objectGUID", guid_bytes(n).to_vec())
        .with("cn", cn)
        .with("sAMAccountName", sam)
}

pub fn group_entry(n: u8, name: &str) -> RawEntry {
    RawEntry::new(format!("CN={name},OU=Groups,DC=example,DC=com"))
        .with_binary("objectGUID", guid_bytes(n).to_vec())
        .with("name", name)
        .with("sAMAccountName", name.to_lowercase())
}

pub async fn memory_repo() -> SqliteRepository {
    DatabasePool::new_sqlite_memory()
        .await
        .unwrap()
        .into_repository()
}

/// In-memory directory. `fail_after` makes enumeration error out after that
/// many entries; `unavailable` makes every call fail up front. `passwords`
/// maps a DN to the password its bind accepts.
#[derive(Default)]
pub struct MockDirectory {
    pub users: Mutex<Vec<RawEntry>>,
    pub groups: Mutex<Vec<RawEntry>>,
    pub fail_after: Mutex<Option<usize>>,
    pub unavailable: Mutex<bool>,
    pub passwords: Mutex<HashMap<String, String>>,
}

impl MockDirectory {
    pub fn with_users(users: Vec<RawEntry>) -> Self {
        Self {
            users: Mutex::new(users),
            ..Default::default()
        }
    }

    pub fn with_groups(groups: Vec<RawEntry>) -> Self {
        Self {
            groups: Mutex::new(groups),
            ..Default::default()
        }
    }

    pub fn set_users(&self, users: Vec<RawEntry>) {
        *self.users.lock().unwrap() = users;
    }

    pub fn set_groups(&self, groups: Vec<RawEntry>) {
        *self.groups.lock().unwrap() = groups;
    }

    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock().unwrap() = Some(n);
    }

    pub fn set_unavailable(&self, down: bool) {
        *self.unavailable.lock().unwrap() = down;
    }

    pub fn set_password(&self, dn: &str, password: &str) {
        self.passwords
            .lock()
            .unwrap()
            .insert(dn.to_string(), password.to_string());
    }

    fn find_user(&self, matches: impl Fn(&RawEntry) -> bool) -> Option<RawEntry> {
        self.users.lock().unwrap().iter().find(|e| matches(e)).cloned()
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(DirsyncError::RemoteUnavailable("connection refused".into()));
        }
        Ok(())
    }

    fn stream(&self, entries: Vec<RawEntry>) -> EntryStream<'static> {
        match *self.fail_after.lock().unwrap() {
            Some(n) => stream::iter(entries.into_iter().take(n).map(Ok))
                .chain(stream::once(async {
                    Err(DirsyncError::RemoteUnavailable(
                        "connection reset during search".into(),
                    ))
                }))
                .boxed(),
            None => stream::iter(entries.into_iter().map(Ok)).boxed(),
        }
    }
}

#[async_trait]
impl DirectoryService for MockDirectory {
    async fn enumerate_users(&self, _attributes: &[String]) -> Result<EntryStream<'_>> {
        self.check_available()?;
        let users = self.users.lock().unwrap().clone();
        Ok(self.stream(users))
    }

    async fn enumerate_groups(&self, _attributes: &[String]) -> Result<EntryStream<'_>> {
        self.check_available()?;
        let groups = self.groups.lock().unwrap().clone();
        Ok(self.stream(groups))
    }

    async fn lookup_by_email(&self, email: &str, _attributes: &[String]) -> Result<Option<RawEntry>> {
        self.check_available()?;
        Ok(self.find_user(|e| {
            e.first_text("mail")
                .map(|m| m.eq_ignore_ascii_case(email))
                .unwrap_or(false)
        }))
    }

    async fn lookup_by_username(
        &self,
        username: &str,
        _attributes: &[String],
    ) -> Result<Option<RawEntry>> {
        self.check_available()?;
        Ok(self.find_user(|e| {
            e.first_text("samaccountname")
                .map(|m| m.eq_ignore_ascii_case(username))
                .unwrap_or(false)
        }))
    }

    async fn lookup_by_identifier(
        &self,
        identifier: &StableIdentifier,
        _attributes: &[String],
    ) -> Result<Option<RawEntry>> {
        self.check_available()?;
        let wire = identifier.to_wire_bytes().to_vec();
        Ok(self.find_user(|e| {
            matches!(e.get("objectguid"), Some(AttributeValue::Binary(values)) if values.contains(&wire))
        }))
    }

    async fn authenticate(&self, dn: &str, password: &str) -> Result<bool> {
        self.check_available()?;
        Ok(!password.is_empty()
            && self.passwords.lock().unwrap().get(dn).map(String::as_str) == Some(password))
    }
}
