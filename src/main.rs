//! # Safe Send Backend - Main Application Entry Point
//!
//! HTTP and WebSocket server behind the Safe Send transaction-risk interpreter.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Every handler and the live session pump run on the actix/tokio runtime
//! - **modules**: One module per concern, declared below
//! - **static**: The shutdown flag lives for the whole program
//!
//! ## Application Architecture:
//! - **config**: Defaults, optional `config.toml`, environment overrides
//! - **state**: Shared configuration, metrics and chat history
//! - **analysis**: REST client for risk analysis and speech synthesis
//! - **audio**: PCM encoding, capture framing and playback scheduling
//! - **live**: Live voice session controller and its transports/devices
//! - **websocket**: `/ws/live`, one live session per browser connection
//! - **health** / **middleware** / **handlers** / **error**: HTTP surface

mod analysis;    // Risk analysis and speech synthesis client (analysis/)
mod audio;       // PCM codec, capture framing, playback scheduling (audio/)
mod config;      // Configuration management (config.rs)
mod error;       // HTTP and live session error types (error.rs)
mod handlers;    // HTTP request handlers (handlers/)
mod health;      // Health and metrics endpoints (health.rs)
mod live;        // Live voice sessions (live/)
mod middleware;  // Request metrics (middleware/)
mod state;       // Application state management (state.rs)
mod websocket;   // Live voice WebSocket actor (websocket.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Creates shared application state**
/// 4. **Configures the HTTP server** with middleware, REST routes and `/ws/live`
/// 5. **Handles graceful shutdown** when receiving system signals
///
/// Live sessions belong to their sockets; stopping the server closes the sockets,
/// and each socket stops its session on the way out.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting safe-send-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if !config.has_api_key() {
        warn!("No model API key configured; analysis falls back, speech and live sessions will fail");
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // middleware runs in reverse order of registration for requests
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/analyze", web::post().to(handlers::analyze))
                    .route("/speech", web::post().to(handlers::synthesize_speech))
                    .route("/messages", web::get().to(handlers::list_messages))
                    .route("/messages", web::delete().to(handlers::clear_messages)),
            )
            .route("/ws/live", web::get().to(websocket::live_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
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

/// Initialize the tracing subscriber.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Filter directives, defaulting to "safe_send_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safe_send_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise `SHUTDOWN_SIGNAL` on the first one.
///
/// If the handlers cannot be installed the server keeps running; it can still be
/// killed, just not drained.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
