//! Assertion consumer: turns a processed SAML assertion into a local member
//! and a login session.

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use dirsync_core::config::DirsyncConfig;
use dirsync_core::db::repository::DirsyncRepository;
use dirsync_core::directory::DirectoryService;
use dirsync_core::error::Result;
use dirsync_core::models::identifier::{IdentifierError, StableIdentifier};
use dirsync_core::models::member::{MemberField, ProfilePatch};
use dirsync_core::models::session::LoginSession;

use dirsync_ldap_sync::resolve::resolve_member;
use dirsync_ldap_sync::sync::DirectorySyncEngine;

use crate::provider::FederationProvider;
use crate::redirect::RedirectPolicy;

/// The only failure text ever shown to the user.
pub const LOGIN_FAILED_MESSAGE: &str =
    "We could not sign you in. Please try again, or contact your administrator if the problem persists.";

/// Why an assertion did not produce a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The provider reported an error while processing the response.
    ProtocolError(String),
    NotAuthenticated,
    /// The name identifier decoded to printable text.
    IdentifierNotBinary,
    IdentifierInvalidShape(String),
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::ProtocolError(_) => "protocol_error",
            FailureReason::NotAuthenticated => "not_authenticated",
            FailureReason::IdentifierNotBinary => "identifier_not_binary",
            FailureReason::IdentifierInvalidShape(_) => "identifier_invalid_shape",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ProtocolError(reason) => write!(f, "authentication error: {reason}"),
            FailureReason::NotAuthenticated => write!(f, "assertion is not authenticated"),
            FailureReason::IdentifierNotBinary => {
                write!(f, "name identifier provided by the identity provider is not a binary GUID")
            }
            FailureReason::IdentifierInvalidShape(detail) => {
                write!(f, "name identifier is not a valid GUID: {detail}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Authenticated {
        member_id: i64,
        session: LoginSession,
    },
    Failed(FailureReason),
}

/// Result of consuming one assertion. Both outcomes carry the same redirect.
#[derive(Debug, Clone, PartialEq)]
pub struct AcsResponse {
    pub outcome: LoginOutcome,
    pub redirect: String,
    pub user_message: Option<&'static str>,
}

impl AcsResponse {
    pub fn is_authenticated(&self) -> bool {
        matches!(self.outcome, LoginOutcome::Authenticated { .. })
    }
}

/// Claim URIs read from the assertion.
#[derive(Debug, Clone)]
struct Claims {
    given_name: String,
    surname: String,
    email: String,
}

/// Sync engine over whichever directory the deployment talks to.
pub type DirectoryEngine<R> = DirectorySyncEngine<R, dyn DirectoryService>;

pub struct AssertionConsumer<R: DirsyncRepository> {
    repo: Arc<R>,
    redirects: RedirectPolicy,
    claims: Claims,
    session_ttl: Duration,
    directory: Option<Arc<DirectoryEngine<R>>>,
}

impl<R: DirsyncRepository> AssertionConsumer<R> {
    pub fn new(repo: Arc<R>, config: &DirsyncConfig) -> Result<Self> {
        Ok(Self {
            repo,
            redirects: RedirectPolicy::new(
                &config.dirsync.base_url,
                config.saml.default_login_dest.as_deref(),
            )?,
            claims: Claims {
                given_name: config.saml.given_name_claim.clone(),
                surname: config.saml.surname_claim.clone(),
                email: config.saml.email_claim.clone(),
            },
            session_ttl: Duration::minutes(i64::from(config.saml.session_timeout_minutes)),
            directory: None,
        })
    }

    /// Re-read each member from the directory after login, so its profile
    /// and mapped groups are current without waiting for the next pass.
    pub fn with_directory_refresh(mut self, engine: Arc<DirectoryEngine<R>>) -> Self {
        self.directory = Some(engine);
        self
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Store a new login session for `member_id`.
    pub async fn start_session(
        &self,
        member_id: i64,
        session_index: Option<String>,
    ) -> Result<LoginSession> {
        let session = LoginSession::new(member_id, session_index, self.session_ttl);
        self.repo.create_login_session(&session).await?;
        Ok(session)
    }

    /// Where to send the browser after a login attempt.
    pub fn redirect_for(&self, back_url: Option<&str>) -> String {
        self.redirects.resolve(back_url)
    }

    /// Consume a processed assertion.
    ///
    /// Rejections come back as `Ok` with `LoginOutcome::Failed`; only store
    /// failures are `Err`.
    pub async fn consume(
        &self,
        provider: &dyn FederationProvider,
        back_url: Option<&str>,
    ) -> Result<AcsResponse> {
        let identifier = match self.validate(provider) {
            Ok(identifier) => identifier,
            Err(reason) => return Ok(self.reject(reason, back_url)),
        };

        let mut member = resolve_member(self.repo.as_ref(), &identifier)
            .await?
            .into_inner();

        // Claims are best-effort; the directory sync fills in the rest.
        let mut patch = ProfilePatch::default();
        for (claim, field) in [
            (&self.claims.given_name, MemberField::FirstName),
            (&self.claims.surname, MemberField::Surname),
            (&self.claims.email, MemberField::Email),
        ] {
            if let Some(value) = provider.first_attribute(claim) {
                patch.set(field, value);
            }
        }
        patch.apply_to(&mut member);
        member.saml_session_index = provider.session_index();
        member.updated_at = Utc::now();

        let member_id = match member.id {
            Some(id) => {
                self.repo.update_member(&member).await?;
                id
            }
            None => self.repo.insert_member(&member).await?,
        };

        self.refresh_from_directory(&identifier, member_id).await;

        let session = self
            .start_session(member_id, provider.session_index())
            .await?;

        info!(
            member_id,
            identifier = %identifier,
            session_id = %session.id,
            "SAML login succeeded"
        );
        Ok(AcsResponse {
            outcome: LoginOutcome::Authenticated { member_id, session },
            redirect: self.redirects.resolve(back_url),
            user_message: None,
        })
    }

    /// Best effort: a directory failure is logged and the login proceeds.
    async fn refresh_from_directory(&self, identifier: &StableIdentifier, member_id: i64) {
        let Some(engine) = &self.directory else {
            return;
        };
        match engine.refresh_member(identifier).await {
            Ok(Some(applied)) => {
                debug!(member_id, outcome = ?applied, "member refreshed from directory at login")
            }
            Ok(None) => debug!(member_id, identifier = %identifier, "login identifier not in directory"),
            Err(e) => warn!(
                member_id,
                identifier = %identifier,
                error = %e,
                "directory refresh at login failed"
            ),
        }
    }

    /// A failed response for a rejection found outside `consume`, such as a
    /// response the processor could not read.
    pub fn reject(&self, reason: FailureReason, back_url: Option<&str>) -> AcsResponse {
        match &reason {
            FailureReason::ProtocolError(_) | FailureReason::IdentifierInvalidShape(_) => {
                error!(reason = reason.code(), detail = %reason, "SAML login rejected")
            }
            _ => warn!(reason = reason.code(), detail = %reason, "SAML login rejected"),
        }
        AcsResponse {
            outcome: LoginOutcome::Failed(reason),
            redirect: self.redirects.resolve(back_url),
            user_message: Some(LOGIN_FAILED_MESSAGE),
        }
    }

    fn validate(
        &self,
        provider: &dyn FederationProvider,
    ) -> std::result::Result<StableIdentifier, FailureReason> {
        if let Some(reason) = provider.last_error_reason() {
            return Err(FailureReason::ProtocolError(reason));
        }
        if !provider.is_authenticated() {
            return Err(FailureReason::NotAuthenticated);
        }
        let encoded = provider
            .name_identifier()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| FailureReason::ProtocolError("assertion has no name identifier".into()))?;
        StableIdentifier::from_base64(encoded.trim()).map_err(|e| match e {
            IdentifierError::Printable => FailureReason::IdentifierNotBinary,
            other => FailureReason::IdentifierInvalidShape(other.to_string()),
        })
    }
}
