use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use dirsync_core::directory::DirectoryService;
use dirsync_ldap_sync::auth::LdapAuthenticator;
use dirsync_ldap_sync::client::LdapDirectory;
use dirsync_ldap_sync::sync::DirectorySyncEngine;
use dirsync_saml::provider::AssertionProcessor;
use dirsync_saml::response::UnsignedResponseParser;
use dirsync_saml::routes::{router as saml_router, SamlState};
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};

use super::{load_config, open_repository};

/// Run the `serve` command: start the SAML and directory login endpoints.
pub async fn run(config_path: &str, port: u16) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if !config.saml.enabled && !config.ldap.auth.enabled {
        anyhow::bail!(
            "No login endpoint is enabled in configuration. Set saml.enabled = true or ldap.auth.enabled = true."
        );
    }
    let repo = open_repository(&config).await?;

    let processor: Option<Arc<dyn AssertionProcessor>> = if config.saml.allow_unsigned_assertions {
        warn!("Accepting SAML responses without signature validation");
        Some(Arc::new(UnsignedResponseParser))
    } else {
        warn!("No SAML assertion processor configured; every login will be rejected");
        None
    };

    let mut state = SamlState::new(repo.clone(), &config, processor)?;
    if config.ldap.enabled {
        let directory: Arc<dyn DirectoryService> = Arc::new(LdapDirectory::new(&config.ldap));
        let engine = Arc::new(DirectorySyncEngine::new(repo, directory, &config));
        state = state.with_directory_refresh(engine.clone());
        if config.ldap.auth.enabled {
            if config.ldap.auth.fallback_authenticator {
                warn!("ldap.auth.fallback_authenticator is set but no local authenticator is available");
            }
            state = state.with_ldap_login(Arc::new(LdapAuthenticator::new(
                engine,
                &config.ldap.auth,
            )));
            info!("Directory login mounted at /ldap/login");
        }
    }
    if config.saml.enabled {
        info!("SAML routes mounted at /saml");
    }
    let app: Router = saml_router(Arc::new(state));

    let app = app
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ));

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    println!("dirsync login endpoints listening on http://{}", addr);
    info!("Starting server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
