use std::net::SocketAddr;
use std::sync::Arc;

use almanac_core::config::AlmanacConfig;
use almanac_dispatch::{Dispatcher, LeaseTable};
use almanac_scheduler::ScheduleStore;
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod app;
mod auth;
mod executor;
mod http;

#[derive(Parser)]
#[command(name = "almanac-gateway", version, about = "Scheduled report API and dispatcher")]
struct Cli {
    /// Path to almanac.toml (falls back to ALMANAC_CONFIG, then ~/.almanac/almanac.toml).
    #[arg(long, short)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and run the dispatcher (default).
    Serve,
    /// Execute every schedule that is currently due, then exit.
    Tick,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "almanac_gateway=info,almanac_dispatch=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: explicit path > ALMANAC_CONFIG env > ~/.almanac/almanac.toml
    let config_path = cli.config.or_else(|| std::env::var("ALMANAC_CONFIG").ok());
    let config = AlmanacConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        AlmanacConfig::default()
    });

    // initialize SQLite database; store and leases each get their own connection
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store = Arc::new(ScheduleStore::new(db)?);

    let lease_ttl = i64::try_from(config.dispatcher.lease_ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .context("dispatcher.lease_ttl_secs out of range")?;
    let leases = LeaseTable::new(rusqlite::Connection::open(&db_path)?, lease_ttl)?;
    info!("database migrations complete");

    let executor = executor::build_executor(&config.executor)?;
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        leases,
        executor,
        config.dispatcher.clone(),
    ));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Tick => {
            let enqueued = dispatcher.poll_once()?;
            let processed = dispatcher.drain().await;
            info!(enqueued, processed, "tick complete");
            Ok(())
        }
        Command::Serve => serve(config, store, dispatcher).await,
    }
}

async fn serve(
    config: AlmanacConfig,
    store: Arc<ScheduleStore>,
    dispatcher: Arc<Dispatcher>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;

    // spawn dispatcher loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let dispatcher_task = if config.dispatcher.enabled {
        let dispatcher = Arc::clone(&dispatcher);
        Some(tokio::spawn(dispatcher.run(shutdown_rx)))
    } else {
        info!("dispatcher disabled; serving API only");
        None
    };

    let state = Arc::new(app::AppState::new(config, store, dispatcher));
    let router = app::build_router(state);

    info!("Almanac gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal dispatcher to stop and let running jobs finish
    let _ = shutdown_tx.send(true);
    if let Some(task) = dispatcher_task {
        task.await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
