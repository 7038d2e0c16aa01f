//! Session server entry point: configuration, wiring, graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use tokio::sync::broadcast;
use tokio::time::timeout;

use server::auth::{InMemoryRevocationList, TokenValidator};
use server::cache::{CacheStore, InMemoryCacheStore};
use server::config::Config;
use server::server::{GameServer, StartupError};
use server::session::Session;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[clap(short, long, env = "CONFIG_PATH", default_value = "config/server.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info");
    }

    let args = Args::parse();
    info!("Loading configuration from {}", args.config.display());
    let config = Arc::new(Config::load(&args.config)?);

    // The deployment substitutes store backends here (Redis revocation
    // list, database-backed cache records); the in-process stores keep a
    // single-node setup self-contained.
    let revocation = Arc::new(InMemoryRevocationList::new());
    let cache_store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());

    let validator = Arc::new(TokenValidator::new(&config.auth, revocation));
    validator
        .refresh()
        .await
        .map_err(StartupError::KeyFetch)?;

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(validator.clone().run_refresh_task(shutdown_tx.subscribe()));

    let (session, session_tasks) =
        Session::start(config.clone(), cache_store, Vec::new(), &shutdown_tx);

    let server = GameServer::new(config.clone(), validator, session, shutdown_tx.clone());
    let (listener, addr) = server.bind().await?;
    info!("Websocket endpoint: ws://{}/ws", addr);
    info!("Health endpoint: http://{}/health", addr);

    let server_task = tokio::spawn(server.run(listener));

    wait_for_signal().await;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    for task in session_tasks {
        if timeout(Duration::from_secs(5), task).await.is_err() {
            error!("Session task did not stop in time");
        }
    }
    if timeout(Duration::from_secs(5), server_task).await.is_err() {
        error!("Listener task did not stop in time");
    }

    info!("Server stopped");
    Ok(())
}

/// Blocks until SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
