mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tsuki_api::auth::{AppState, AppStateInner};
use tsuki_api::oauth::OAuthClient;
use tsuki_auth::{LogNotifier, TokenService};
use tsuki_db::Database;
use tsuki_types::models::Provider;

use crate::config::{Config, ConfigError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tsuki=debug,tsuki_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ConfigError::InsecureSecret) => {
            eprintln!("FATAL: TSUKI_SECRET_KEY is unset or still a placeholder.");
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let db = Database::open(&config.db_path)?;
    let oauth = OAuthClient::new(config.oauth)?;
    for provider in [Provider::Discord, Provider::GitHub, Provider::Google] {
        if oauth.enabled(provider) {
            info!("OAuth sign-in enabled for {}", provider);
        }
    }

    let state: AppState = Arc::new(AppStateInner {
        db,
        tokens: TokenService::new(config.secret_key.as_bytes(), config.issuer),
        base_url: config.base_url,
        oauth,
        notifier: Arc::new(LogNotifier),
    });

    let app = tsuki_api::router(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Tsuki server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(state) {
        Ok(inner) => inner.db.close()?,
        Err(_) => warn!("State still shared at shutdown, leaving the database to drop"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
