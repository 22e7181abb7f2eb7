//! Rumpel tracker - host bridge service.
//!
//! Run with: `cargo run -p rumpel-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use rumpel_core::HttpTransport;
use rumpel_service::{AppState, Config, api, ws};
use rumpel_store::Store;

/// Environment variable holding the initial HAT auth token.
const AUTH_TOKEN_ENV: &str = "RUMPEL_AUTH_TOKEN";

/// Rumpel tracker - local bridge between the host app and the tracking core.
#[derive(Parser, Debug)]
#[command(name = "rumpel-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Upload endpoint (overrides config).
    #[arg(long)]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rumpel_service=info".parse()?)
                .add_directive("rumpel_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if let Some(endpoint) = args.endpoint {
        config.sync.endpoint = endpoint;
    }
    config.validate()?;

    if !config.sync.is_enabled() {
        warn!("No sync endpoint configured, samples will stay buffered");
    }

    // Open the database
    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?;

    let transport = Arc::new(HttpTransport::new(&config.sync.auth_header)?);
    let token = std::env::var(AUTH_TOKEN_ENV)
        .ok()
        .filter(|t| !t.trim().is_empty());
    if token.is_none() {
        info!("{} not set, waiting for PUT /api/auth/token", AUTH_TOKEN_ENV);
    }

    let addr: SocketAddr = config.server.bind.parse()?;
    let state = AppState::start(store, config, transport, token);

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.core.shutdown();
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
