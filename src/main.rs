//! Livefeed server - Binary Entry Point
//!
//! Usage: `livefeed-server [config.yml]`. Without an argument the path is
//! taken from `LIVEFEED_CONFIG`, then `config.yml`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use livefeed::alert::notifier_for;
use livefeed::api::{create_router, AppState};
use livefeed::config::DEFAULT_CONFIG_PATH;
use livefeed::store::StoreOptions;
use livefeed::{Broadcaster, ChangePoller, Config, EntityKind, SqliteStore, TokenCleanup};

/// Bound on waiting for background tasks at shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LIVEFEED_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    livefeed::logging::init(config.debug, config.log_file.as_deref())
        .context("failed to initialise logging")?;
    info!(version = livefeed::VERSION, config = %config_path, "starting livefeed server");

    let db_path = config.database_path()?;
    let store_options = StoreOptions {
        pool_size: config.db_pool_size,
        token_ttl: config.token_ttl(),
        timezone: config.timezone(),
        ..StoreOptions::default()
    };
    let store = Arc::new(
        SqliteStore::open(&db_path, &store_options)
            .with_context(|| format!("failed to open database {}", db_path.display()))?,
    );
    store.ping().await.context("database is not reachable")?;
    info!(path = %db_path.display(), timezone = %store_options.timezone, "connected to database");

    let broadcaster = Arc::new(Broadcaster::new(config.buffer_policy()));
    let notifier = notifier_for(config.discord_webhook_url.as_deref())
        .context("failed to build alert notifier")?;
    if config.discord_webhook_url.is_none() {
        warn!("DISCORD_WEBHOOK_URL not set, alerts will only be logged");
    }

    let shutdown = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    for kind in EntityKind::ALL {
        let poller = ChangePoller::new(
            kind,
            store.clone(),
            Arc::clone(&broadcaster),
            Arc::clone(&notifier),
            config.poll_interval(kind),
        );
        tasks.push(tokio::spawn(poller.run(shutdown.clone())));
    }
    tasks.push(tokio::spawn(
        TokenCleanup::new(Arc::clone(&store)).run(shutdown.clone()),
    ));

    let state = AppState::new(broadcaster, store.clone(), store, shutdown.clone())
        .with_session_config(config.session_config())
        .with_app_url(config.app_url.clone());
    let app = create_router(Arc::new(state));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            signal_token.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    info!(task_count = tasks.len(), "waiting for background tasks");
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(tasks))
        .await
        .is_err()
    {
        warn!("background tasks did not stop within {SHUTDOWN_TIMEOUT:?}");
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
