mod cleanup;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use colloquy_api::{AppState, AppStateInner};
use colloquy_core::{AccountService, ConversationService, GenerationSettings, HttpGenerator};
use colloquy_crypto::TokenIssuer;
use colloquy_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "colloquy=debug,colloquy_core=debug,colloquy_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    let generator = HttpGenerator::new(config.generator.clone())?;
    let settings = GenerationSettings {
        timeout: config.generation_timeout,
        ..GenerationSettings::default()
    };

    let accounts = AccountService::new(db.clone(), TokenIssuer::new(&config.jwt_secret));
    let conversations = ConversationService::new(db, accounts.clone(), Arc::new(generator), settings);

    tokio::spawn(cleanup::run_cleanup_loop(accounts.clone(), config.cleanup_interval));

    let state: AppState = Arc::new(AppStateInner {
        accounts,
        conversations,
        secure_cookies: config.secure_cookies,
    });

    let app = colloquy_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Colloquy server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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
                tracing::warn!("Could not install SIGTERM handler: {}", e);
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
