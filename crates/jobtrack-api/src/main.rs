//! jobtrack API server

use anyhow::Context;
use clap::Parser;
use jobtrack_api::{AppState, routes};
use jobtrack_config::{LogFormat, LoggingConfig, Settings, StorageConfig};
use jobtrack_core::ExecutionGateway;
use jobtrack_db::{MemoryResultStore, PgResultStore, ResultStore, create_pool, run_migrations};
use jobtrack_gateway::JenkinsGateway;
use jobtrack_tracker::BuildLifecycleTracker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobtrack-server")]
#[command(about = "Trigger CI builds and track them to completion", version)]
struct Args {
    /// Settings file (defaults to jobtrack.kdl when present)
    #[arg(short, long, env = "JOBTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the settings file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings: Settings =
        jobtrack_config::load(args.config.as_deref()).context("failed to load settings")?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    init_tracing(&settings.logging);
    info!("Starting jobtrack API server...");

    let store = connect_store(&settings.storage).await?;

    let gateway = JenkinsGateway::new(&settings.engine)?;
    if gateway.health_check().await {
        info!(engine = %settings.engine.url, "Engine connection successful");
    } else {
        warn!(engine = %settings.engine.url, "Engine connection failed");
    }

    let tracker = Arc::new(BuildLifecycleTracker::new(Arc::new(gateway), store));
    let api_key = settings
        .auth
        .api_key
        .clone()
        .context("auth api-key is required")?;
    let state = AppState::new(tracker, api_key);

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down jobtrack API server");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

async fn connect_store(storage: &StorageConfig) -> anyhow::Result<Arc<dyn ResultStore>> {
    match storage {
        StorageConfig::Postgres {
            url,
            max_connections,
        } => {
            info!("Connecting to database...");
            let pool = create_pool(url, *max_connections).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            Ok(Arc::new(PgResultStore::new(pool)))
        }
        StorageConfig::Memory => {
            warn!("Using in-memory storage; results are lost on restart");
            Ok(Arc::new(MemoryResultStore::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
