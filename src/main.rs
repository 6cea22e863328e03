//! # Voice Turn Capture
//!
//! An ingestion server for realtime voice dialogues. Clients stream session
//! boundaries, dialogue events and base64 WebM fragments; the server slices
//! them into turns and writes each turn as a playable audio file, a
//! transcript and a metadata record.
//!
//! ## Startup Order:
//! 1. `.env`, tracing, layered configuration
//! 2. Filesystem store and the capture loop
//! 3. HTTP server (REST ingestion + WebSocket ingestion)
//!
//! ## Shutdown Order:
//! SIGINT/SIGTERM stops the HTTP server first, so no new messages arrive,
//! then the capture loop drains every live session before the process exits.

mod capture;
mod config;
mod error;
mod handlers;
mod health;
mod media;
mod state;
mod store;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::capture::{spawn_capture_service, TurnTracker};
use crate::config::AppConfig;
use crate::state::AppState;
use crate::store::FsTurnStore;
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        input_grace_ms = config.capture.input_grace_ms,
        output_grace_ms = config.capture.output_grace_ms,
        max_sessions = config.capture.max_concurrent_sessions,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let store = FsTurnStore::new(&config.storage.output_dir);
    std::fs::create_dir_all(store.root())
        .with_context(|| format!("creating output directory {}", store.root().display()))?;
    info!("Writing turns under {}", store.root().display());

    let tracker = TurnTracker::new(config.tracker_options(), Arc::new(store));
    let (capture, capture_task) = spawn_capture_service(tracker, config.capture.command_buffer);

    let app_state = AppState::new(config.clone(), capture.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("HTTP server stopped, draining capture sessions");
    if let Err(e) = capture.shutdown().await {
        error!("Capture shutdown request failed: {}", e);
    }
    match capture_task.await {
        Ok(stats) => info!(
            sessions = stats.sessions_ended,
            turns = stats.turns_saved,
            audio_bytes = stats.audio_bytes_written,
            "Capture drained"
        ),
        Err(e) => error!("Capture task error: {}", e),
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_turn_capture=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                std::future::pending::<()>().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}
