//! # Voice Log Backend - Main Application Entry Point
//!
//! Backend for a browser voice recorder. The page streams recorded audio
//! chunks over a WebSocket, receives log lines back while it records, and
//! reads a short history of finished sessions over HTTP.
//!
//! ## Application Architecture:
//! - **config**: application configuration (TOML file + environment variables)
//! - **state**: shared application state, history store and metrics
//! - **audio**: per-session chunk assembly, session registry, artifact files
//! - **pipeline**: log pipeline trait and the per-session worker that drives it
//! - **history**: append-only history of finished session summaries
//! - **websocket**: the `/ws` recording gateway actor
//! - **handlers**: HTTP request handlers (`/history`, `/clear`, `/`, `/static`, `/api/v1/...`)
//! - **health**: health and metrics endpoints
//! - **middleware**: request metrics collection
//! - **error**: error types and HTTP error responses

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod history;
mod middleware;
mod pipeline;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT has been received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Loads configuration, builds the shared state (including the history
/// store, which fails start-up if its directory is unusable), then serves
/// HTTP and WebSocket traffic until a shutdown signal arrives.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-log-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config.clone())?;
    info!(
        pipeline = app_state.pipeline.name(),
        persistent_history = app_state.history.is_persistent(),
        history_entries = app_state.history.len()?,
        max_sessions = config.performance.max_concurrent_sessions,
        "Application state ready"
    );
    if let Some(writer) = &app_state.artifacts {
        info!("Saving recordings to {}", writer.dir().display());
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = web::Data::new(app_state);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            // Middleware executes in reverse order for responses
            .wrap(build_cors(&app_state.get_config().server.cors_origins))
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .route("/", web::get().to(handlers::index))
            .route("/history", web::get().to(handlers::get_history))
            .route("/clear", web::post().to(handlers::clear_history))
            .route("/ws", web::get().to(websocket::session_gateway))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{session_id}", web::get().to(handlers::get_session)),
            )
            .route("/health", web::get().to(health::health_check))
            .service(handlers::static_files(&app_state.get_config().server.static_dir))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls the filter; defaults to
/// `voice_log_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_log_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// An empty origin list allows any origin.
fn build_cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600);

    if origins.is_empty() {
        return cors.allow_any_origin();
    }
    origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
