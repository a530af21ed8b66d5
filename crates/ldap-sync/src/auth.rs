//! Password login by binding to the directory as the user.
//!
//! A successful bind also refreshes the member from the directory entry, so
//! a first login creates the local member linked to its identifier.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use dirsync_core::config::LdapAuthConfig;
use dirsync_core::db::repository::DirsyncRepository;
use dirsync_core::directory::DirectoryService;
use dirsync_core::error::Result;

use crate::sync::DirectorySyncEngine;

/// Local password check used for logins the directory does not know.
#[async_trait]
pub trait FallbackAuthenticator: Send + Sync {
    /// The local member id when `login` and `password` match.
    async fn authenticate(&self, login: &str, password: &str) -> Result<Option<i64>>;
}

/// Why a login was turned away. The `Display` text is shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingCredentials,
    EmailLoginDisabled,
    UsernameNotFound,
    InvalidCredentials,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthFailure::MissingCredentials => "Please enter a username and password.",
            AuthFailure::EmailLoginDisabled => {
                "Please enter your username instead of your email to log in."
            }
            AuthFailure::UsernameNotFound => "Username not found.",
            AuthFailure::InvalidCredentials => {
                "The provided details don't seem to be correct. Please try again."
            }
        })
    }
}

/// Result of a login attempt that reached a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Bound to the directory; the member was created or refreshed.
    Authenticated { member_id: i64 },
    /// The directory had no such user and the local authenticator accepted
    /// it. The member is not linked to the directory.
    LocalOnly { member_id: i64 },
    Rejected(AuthFailure),
}

impl AuthOutcome {
    pub fn member_id(&self) -> Option<i64> {
        match self {
            AuthOutcome::Authenticated { member_id } | AuthOutcome::LocalOnly { member_id } => {
                Some(*member_id)
            }
            AuthOutcome::Rejected(_) => None,
        }
    }
}

pub struct LdapAuthenticator<R, D>
where
    R: DirsyncRepository,
    D: DirectoryService + ?Sized,
{
    engine: Arc<DirectorySyncEngine<R, D>>,
    config: LdapAuthConfig,
    fallback: Option<Arc<dyn FallbackAuthenticator>>,
}

impl<R, D> LdapAuthenticator<R, D>
where
    R: DirsyncRepository,
    D: DirectoryService + ?Sized,
{
    pub fn new(engine: Arc<DirectorySyncEngine<R, D>>, config: &LdapAuthConfig) -> Self {
        Self {
            engine,
            config: config.clone(),
            fallback: None,
        }
    }

    /// Local authenticator consulted when `fallback_authenticator` is on.
    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackAuthenticator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Check `login` (a username, or an email when allowed) and `password`.
    ///
    /// Errors are reserved for an unreachable directory or a failed store
    /// write. Bad input and bad credentials come back as `Rejected`.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<AuthOutcome> {
        let login = login.trim();
        if login.is_empty() || password.is_empty() {
            return Ok(AuthOutcome::Rejected(AuthFailure::MissingCredentials));
        }

        let by_email = login.contains('@');
        if by_email && !self.config.allow_email_login {
            debug!(login, "email login attempted while disabled");
            return Ok(AuthOutcome::Rejected(AuthFailure::EmailLoginDisabled));
        }

        let directory = self.engine.directory();
        let attributes = self.engine.user_attributes();
        let entry = if by_email {
            directory.lookup_by_email(login, &attributes).await?
        } else {
            directory.lookup_by_username(login, &attributes).await?
        };

        let Some(entry) = entry else {
            return self.try_fallback(login, password).await;
        };

        if !directory.authenticate(&entry.dn, password).await? {
            info!(login, dn = %entry.dn, "directory rejected credentials");
            return Ok(AuthOutcome::Rejected(AuthFailure::InvalidCredentials));
        }

        let applied = self.engine.apply_user_entry(&entry).await?;
        info!(login, member_id = applied.id(), "directory login");
        Ok(AuthOutcome::Authenticated {
            member_id: applied.id(),
        })
    }

    async fn try_fallback(&self, login: &str, password: &str) -> Result<AuthOutcome> {
        let fallback = match (&self.fallback, self.config.fallback_authenticator) {
            (Some(fallback), true) => fallback,
            (None, true) => {
                warn!("fallback_authenticator is enabled but no local authenticator is configured");
                return Ok(AuthOutcome::Rejected(AuthFailure::UsernameNotFound));
            }
            _ => {
                debug!(login, "login not found in directory");
                return Ok(AuthOutcome::Rejected(AuthFailure::UsernameNotFound));
            }
        };
        match fallback.authenticate(login, password).await? {
            Some(member_id) => {
                info!(login, member_id, "local fallback login");
                Ok(AuthOutcome::LocalOnly { member_id })
            }
            None => Ok(AuthOutcome::Rejected(AuthFailure::InvalidCredentials)),
        }
    }
}
