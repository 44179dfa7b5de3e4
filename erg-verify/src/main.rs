//! erg-verify - Rowing distance verification microservice
//!
//! **Module Identity:**
//! - Name: erg-verify
//! - Port: 5731 (`ERG_VERIFY_PORT`)
//!
//! Accepts photos of rowing machine displays with a claimed distance and
//! decides whether the claim is verified, rejected or needs human review.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use erg_verify::services::GeminiVisionClient;
use erg_verify::AppState;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "erg-verify")]
#[command(about = "Rowing distance verification microservice for ergtally")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "ERG_VERIFY_PORT")]
    port: Option<u16>,

    /// Root folder holding the database
    #[arg(short, long, env = "ERG_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "ERG_VERIFY_BIND")]
    bind: std::net::IpAddr,
}

const DEFAULT_PORT: u16 = 5731;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "erg_verify=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting erg-verify v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let toml_config = erg_common::config::load_config();

    // Root folder: CLI/ENV (clap) → TOML → OS default
    let root_folder = erg_common::config::RootFolderResolver::new("erg-verify")
        .with_cli_arg(args.root_folder)
        .resolve();

    let initializer = erg_common::config::RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let db_pool = erg_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let shared_secret = erg_common::api::load_shared_secret(&db_pool)
        .await
        .context("Failed to load API shared secret")?;
    if shared_secret == 0 {
        warn!("API shared secret is 0: request signatures are NOT checked");
    }

    let oracle_settings = erg_verify::config::resolve_oracle_settings(&db_pool, &toml_config)
        .await
        .context("Failed to resolve oracle settings")?;
    info!(
        model = %oracle_settings.model,
        timeout_secs = oracle_settings.timeout.as_secs(),
        requests_per_minute = oracle_settings.requests_per_minute,
        "Vision oracle configured"
    );
    let oracle = GeminiVisionClient::new(oracle_settings).context("Failed to build oracle client")?;

    let state = AppState::new(db_pool, shared_secret, Arc::new(oracle))
        .with_toml_sync_path(erg_verify::config::toml_sync_path());

    let app = erg_verify::build_router(state);

    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::new(args.bind, port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
