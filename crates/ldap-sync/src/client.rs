//! LDAP client for Active Directory and other directory servers.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, info};

use dirsync_core::config::LdapConfig;
use dirsync_core::directory::{DirectoryService, EntryStream};
use dirsync_core::error::{DirsyncError, Result};
use dirsync_core::models::directory::RawEntry;
use dirsync_core::models::identifier::StableIdentifier;

/// `invalidCredentials` result code.
const INVALID_CREDENTIALS: u32 = 49;

/// Page size requested from the server; AD caps unpaged searches at 1000.
const PAGE_SIZE: i32 = 500;

/// Directory service backed by an LDAP server.
pub struct LdapDirectory {
    config: LdapConfig,
}

impl LdapDirectory {
    pub fn new(config: &LdapConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Open a connection without binding.
    async fn open(&self) -> Result<Ldap> {
        let conn_cfg = &self.config.connection;
        let settings = LdapConnSettings::new()
            .set_no_tls_verify(!conn_cfg.tls_verify)
            .set_conn_timeout(Duration::from_secs(conn_cfg.timeout_secs));
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &conn_cfg.server)
            .await
            .map_err(|e| DirsyncError::RemoteUnavailable(format!("LDAP connect failed: {e}")))?;

        ldap3::drive!(conn);
        ldap.with_timeout(Duration::from_secs(conn_cfg.timeout_secs));
        Ok(ldap)
    }

    /// Open a connection bound as the service account.
    async fn connect(&self) -> Result<Ldap> {
        let conn_cfg = &self.config.connection;
        let mut ldap = self.open().await?;
        ldap.simple_bind(&conn_cfg.bind_dn, &conn_cfg.bind_password)
            .await
            .map_err(|e| DirsyncError::RemoteUnavailable(format!("LDAP bind failed: {e}")))?
            .success()
            .map_err(|e| DirsyncError::RemoteUnavailable(format!("LDAP bind rejected: {e}")))?;

        debug!(server = %conn_cfg.server, "LDAP bind successful");
        Ok(ldap)
    }

    /// Bind and unbind once.
    pub async fn test_connection(&self) -> Result<()> {
        let mut ldap = self.connect().await?;
        ldap.unbind()
            .await
            .map_err(|e| DirsyncError::RemoteUnavailable(format!("LDAP unbind failed: {e}")))?;
        info!(server = %self.config.connection.server, "LDAP connection test successful");
        Ok(())
    }

    /// Paged subtree search yielding entries as the server returns them.
    ///
    /// The stream ends with an error if the search fails part way; callers
    /// must treat that as an incomplete enumeration.
    async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> Result<EntryStream<'static>> {
        let mut ldap = self.connect().await?;
        let adapters: Vec<Box<dyn Adapter<'static, String, Vec<String>>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(PAGE_SIZE)),
        ];
        let search = ldap
            .streaming_search_with(
                adapters,
                base,
                Scope::Subtree,
                filter,
                attributes.to_vec(),
            )
            .await
            .map_err(|e| DirsyncError::RemoteUnavailable(format!("LDAP search failed: {e}")))?;
        debug!(base, filter, "LDAP search started");

        let entries = stream::try_unfold((search, ldap), |(mut search, mut ldap)| async move {
            match search.next().await {
                Ok(Some(entry)) => {
                    let entry = raw_entry(SearchEntry::construct(entry));
                    Ok(Some((entry, (search, ldap))))
                }
                Ok(None) => {
                    search
                        .finish()
                        .await
                        .success()
                        .map_err(|e| {
                            DirsyncError::RemoteUnavailable(format!("LDAP search error: {e}"))
                        })?;
                    ldap.unbind().await.ok();
                    Ok(None)
                }
                Err(e) => Err(DirsyncError::RemoteUnavailable(format!(
                    "LDAP search interrupted: {e}"
                ))),
            }
        });
        Ok(entries.boxed())
    }

    /// Search the user base for at most one entry. Several matches mean
    /// the directory cannot tell the users apart.
    async fn lookup_one(
        &self,
        filter: &str,
        described: &str,
        attributes: &[String],
    ) -> Result<Option<RawEntry>> {
        let mut ldap = self.connect().await?;
        let (results, _) = ldap
            .search(
                self.config.user_search_base(),
                Scope::Subtree,
                filter,
                attributes.to_vec(),
            )
            .await
            .map_err(|e| DirsyncError::RemoteUnavailable(format!("LDAP search failed: {e}")))?
            .success()
            .map_err(|e| DirsyncError::RemoteUnavailable(format!("LDAP search error: {e}")))?;
        ldap.unbind().await.ok();

        if results.len() > 1 {
            return Err(DirsyncError::Config(format!(
                "{} directory users share {described}",
                results.len()
            )));
        }
        Ok(results
            .into_iter()
            .next()
            .map(|entry| raw_entry(SearchEntry::construct(entry))))
    }
}

#[async_trait]
impl DirectoryService for LdapDirectory {
    async fn enumerate_users(&self, attributes: &[String]) -> Result<EntryStream<'_>> {
        self.search(
            self.config.user_search_base(),
            &self.config.users.filter,
            attributes,
        )
        .await
    }

    async fn enumerate_groups(&self, attributes: &[String]) -> Result<EntryStream<'_>> {
        self.search(
            self.config.group_search_base(),
            &self.config.groups.filter,
            attributes,
        )
        .await
    }

    async fn lookup_by_email(&self, email: &str, attributes: &[String]) -> Result<Option<RawEntry>> {
        let filter = email_filter(&self.config.users.filter, email);
        self.lookup_one(&filter, &format!("email {email}"), attributes)
            .await
    }

    async fn lookup_by_username(
        &self,
        username: &str,
        attributes: &[String],
    ) -> Result<Option<RawEntry>> {
        let filter = username_filter(&self.config.users.filter, username);
        self.lookup_one(&filter, &format!("username {username}"), attributes)
            .await
    }

    async fn lookup_by_identifier(
        &self,
        identifier: &StableIdentifier,
        attributes: &[String],
    ) -> Result<Option<RawEntry>> {
        let filter = identifier_filter(
            &self.config.users.filter,
            &self.config.users.identifier_attribute,
            identifier,
        );
        self.lookup_one(&filter, &format!("identifier {identifier}"), attributes)
            .await
    }

    async fn authenticate(&self, dn: &str, password: &str) -> Result<bool> {
        // an empty password is an unauthenticated bind, which servers accept
        if dn.is_empty() || password.is_empty() {
            return Ok(false);
        }
        let mut ldap = self.open().await?;
        let result = ldap
            .simple_bind(dn, password)
            .await
            .map_err(|e| DirsyncError::RemoteUnavailable(format!("LDAP bind failed: {e}")))?;
        ldap.unbind().await.ok();
        match result.rc {
            0 => Ok(true),
            INVALID_CREDENTIALS => {
                debug!(dn, "LDAP bind rejected credentials");
                Ok(false)
            }
            rc => Err(DirsyncError::RemoteUnavailable(format!(
                "LDAP bind returned {rc}: {}",
                result.text
            ))),
        }
    }
}

/// `user_filter` ANDed with one already-escaped assertion.
fn narrowed_filter(user_filter: &str, assertion: &str) -> String {
    let base = user_filter.trim();
    let base = if base.starts_with('(') {
        base.to_string()
    } else {
        format!("({base})")
    };
    format!("(&{base}({assertion}))")
}

/// User filter narrowed to one email address, with the value escaped.
pub fn email_filter(user_filter: &str, email: &str) -> String {
    narrowed_filter(user_filter, &format!("mail={}", ldap_escape(email)))
}

/// User filter narrowed to one login name.
pub fn username_filter(user_filter: &str, username: &str) -> String {
    narrowed_filter(
        user_filter,
        &format!("sAMAccountName={}", ldap_escape(username)),
    )
}

/// User filter narrowed to one identifier, every byte hex-escaped.
pub fn identifier_filter(
    user_filter: &str,
    attribute: &str,
    identifier: &StableIdentifier,
) -> String {
    let escaped: String = identifier
        .to_wire_bytes()
        .iter()
        .map(|b| format!("\\{b:02x}"))
        .collect();
    narrowed_filter(user_filter, &format!("{attribute}={escaped}"))
}

/// Convert an ldap3 entry, keeping binary values apart from text.
pub fn raw_entry(entry: SearchEntry) -> RawEntry {
    let mut raw = RawEntry::new(entry.dn);
    for (name, values) in entry.attrs {
        raw.set_text(&name, values);
    }
    for (name, values) in entry.bin_attrs {
        raw.set_binary(&name, values);
    }
    raw
}
