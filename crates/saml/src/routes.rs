//! Axum routes for the assertion consumer, SP metadata and the directory
//! password login.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tracing::{error, info};

use dirsync_core::config::DirsyncConfig;
use dirsync_core::db::sqlite::SqliteRepository;
use dirsync_core::directory::DirectoryService;
use dirsync_core::error::Result;
use dirsync_core::models::session::LoginSession;
use dirsync_ldap_sync::auth::{AuthOutcome, LdapAuthenticator};

use crate::acs::{
    AcsResponse, AssertionConsumer, DirectoryEngine, FailureReason, LoginOutcome,
    LOGIN_FAILED_MESSAGE,
};
use crate::metadata::generate_sp_metadata;
use crate::provider::AssertionProcessor;

pub const SESSION_COOKIE: &str = "dirsync_session";
pub const LOGIN_FAILED_COOKIE: &str = "dirsync_login_failed";

pub type DirectoryAuthenticator = LdapAuthenticator<SqliteRepository, dyn DirectoryService>;

/// Shared state for the login routes.
pub struct SamlState {
    pub consumer: AssertionConsumer<SqliteRepository>,
    /// `None` leaves the ACS answering every post with a protocol failure.
    pub processor: Option<Arc<dyn AssertionProcessor>>,
    pub entity_id: String,
    pub acs_url: String,
    /// Mount `/saml/*`.
    pub saml_enabled: bool,
    /// Mount `/ldap/login` when set.
    pub authenticator: Option<Arc<DirectoryAuthenticator>>,
}

impl SamlState {
    pub fn new(
        repo: Arc<SqliteRepository>,
        config: &DirsyncConfig,
        processor: Option<Arc<dyn AssertionProcessor>>,
    ) -> Result<Self> {
        let base = config.dirsync.base_url.trim_end_matches('/');
        let acs_url = config
            .saml
            .acs_url
            .clone()
            .unwrap_or_else(|| format!("{base}/saml/acs"));
        let entity_id = if config.saml.entity_id.is_empty() {
            format!("{base}/saml/metadata")
        } else {
            config.saml.entity_id.clone()
        };
        Ok(Self {
            consumer: AssertionConsumer::new(repo, config)?,
            processor,
            entity_id,
            acs_url,
            saml_enabled: config.saml.enabled,
            authenticator: None,
        })
    }

    /// Refresh each SAML login from the directory.
    pub fn with_directory_refresh(mut self, engine: Arc<DirectoryEngine<SqliteRepository>>) -> Self {
        self.consumer = self.consumer.with_directory_refresh(engine);
        self
    }

    /// Accept directory passwords at `/ldap/login`.
    pub fn with_ldap_login(mut self, authenticator: Arc<DirectoryAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }
}

/// Build the login router.
pub fn router(state: Arc<SamlState>) -> Router {
    let mut app = Router::new();
    if state.saml_enabled {
        app = app
            .route("/saml/metadata", get(saml_metadata))
            .route("/saml/acs", post(saml_acs));
    }
    if state.authenticator.is_some() {
        app = app.route("/ldap/login", post(ldap_login));
    }
    app.with_state(state)
}

/// HTTP-POST binding payload.
#[derive(Deserialize)]
pub struct AcsForm {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: String,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

/// Directory password login form.
#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(rename = "Login", default)]
    pub login: String,
    #[serde(rename = "Password", default)]
    pub password: String,
    #[serde(rename = "BackURL")]
    pub back_url: Option<String>,
}

async fn saml_metadata(State(state): State<Arc<SamlState>>) -> Response {
    let xml = generate_sp_metadata(&state.entity_id, &state.acs_url);
    (
        [(header::CONTENT_TYPE, "application/samlmetadata+xml")],
        xml,
    )
        .into_response()
}

async fn saml_acs(State(state): State<Arc<SamlState>>, Form(form): Form<AcsForm>) -> Response {
    let back_url = form.relay_state.as_deref();

    let result = match &state.processor {
        None => Ok(state.consumer.reject(
            FailureReason::ProtocolError("no assertion processor is configured".into()),
            back_url,
        )),
        Some(processor) => match processor.process(&form.saml_response).await {
            Ok(assertion) => state.consumer.consume(&assertion, back_url).await,
            Err(e) => Ok(state
                .consumer
                .reject(FailureReason::ProtocolError(e.to_string()), back_url)),
        },
    };

    match result {
        Ok(response) => acs_response(&state, response),
        Err(e) => {
            error!(error = %e, "SAML login could not be completed");
            (StatusCode::INTERNAL_SERVER_ERROR, LOGIN_FAILED_MESSAGE).into_response()
        }
    }
}

async fn ldap_login(State(state): State<Arc<SamlState>>, Form(form): Form<LoginForm>) -> Response {
    let Some(authenticator) = &state.authenticator else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let member_id = match authenticator.authenticate(&form.login, &form.password).await {
        Ok(AuthOutcome::Authenticated { member_id } | AuthOutcome::LocalOnly { member_id }) => {
            member_id
        }
        Ok(AuthOutcome::Rejected(failure)) => {
            info!(reason = ?failure, "directory login rejected");
            return (StatusCode::UNAUTHORIZED, failure.to_string()).into_response();
        }
        Err(e) => {
            error!(error = %e, "directory login could not be completed");
            return (StatusCode::SERVICE_UNAVAILABLE, LOGIN_FAILED_MESSAGE).into_response();
        }
    };

    match state.consumer.start_session(member_id, None).await {
        Ok(session) => {
            let redirect = state.consumer.redirect_for(form.back_url.as_deref());
            session_redirect(&state, &session, &redirect)
        }
        Err(e) => {
            error!(error = %e, member_id, "failed to store login session");
            (StatusCode::INTERNAL_SERVER_ERROR, LOGIN_FAILED_MESSAGE).into_response()
        }
    }
}

fn session_cookie(state: &SamlState, session: &LoginSession) -> String {
    format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id,
        state.consumer.session_ttl().num_seconds()
    )
}

fn session_redirect(state: &SamlState, session: &LoginSession, to: &str) -> Response {
    with_cookie(Redirect::to(to).into_response(), &session_cookie(state, session))
}

fn with_cookie(mut response: Response, cookie: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

fn acs_response(state: &SamlState, acs: AcsResponse) -> Response {
    let cookie = match &acs.outcome {
        LoginOutcome::Authenticated { session, .. } => session_cookie(state, session),
        LoginOutcome::Failed(_) => {
            format!("{LOGIN_FAILED_COOKIE}=1; Path=/; SameSite=Lax; Max-Age=60")
        }
    };
    with_cookie(Redirect::to(&acs.redirect).into_response(), &cookie)
}
