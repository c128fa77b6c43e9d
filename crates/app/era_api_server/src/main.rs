//! EraCheck authentication API server binary.

use std::sync::Arc;

use clap::Parser;
use era_api::config::ApiConfig;
use era_core::auth::session::SessionService;
use era_core::store::CredentialStore;
use era_core::store::memory::MemoryCredentialStore;
use era_core::store::postgres::{self, PgCredentialStore};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "era_api_server", about = "EraCheck authentication API server")]
struct Args {
    /// Port to listen on. Overrides the port of `BIND_ADDR`.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/eracheck"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,

    /// Keep all accounts in memory instead of PostgreSQL. Data is lost on
    /// exit.
    #[arg(long, default_value_t = false)]
    memory_store: bool,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,era_api=debug,era_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    info!(version = era_core::version(), "starting era_api_server");
    let mut config = ApiConfig::from_env()?;
    if let Some(port) = args.port {
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map_or("0.0.0.0", |(host, _)| host);
        config.bind_addr = format!("{host}:{port}");
    }

    let store: Arc<dyn CredentialStore> = if args.memory_store {
        warn!("using in-memory credential store");
        Arc::new(MemoryCredentialStore::new())
    } else {
        info!(max_connections = args.max_connections, "configuring connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(args.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&args.database_url)
            .await?;

        info!("running database migrations");
        postgres::migrate(&pool).await?;
        Arc::new(PgCredentialStore::new(pool))
    };

    let service = SessionService::from_config(config.auth_config(), store)?;
    let state = era_api::AppState {
        service: Arc::new(service),
        config: config.clone(),
    };
    let app = era_api::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
