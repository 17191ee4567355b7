pub mod api;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tokio::sync::{watch, Notify};

use crate::api::AppState;
use crate::crypto::Cryptor;
use crate::store::DefaultAdapterFactory;
use crate::sync::ProductSyncScheduler;
use crate::webhooks::{DispatcherConfig, WebhookDispatcher};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opencat_server=debug,tower_http=debug".parse().unwrap()),
        )
        .init();

    tracing::info!("OpenCat server starting");

    let config = config::AppConfig::load()?;
    let cryptor = Arc::new(Cryptor::new(
        config.server.secret_key.expose_secret().as_bytes(),
    )?);
    let pool = db::connect(&config.database.url).await?;

    let apple_root_ca = match &config.apple.root_ca_path {
        Some(path) => Some(std::fs::read(path)?),
        None => {
            tracing::warn!("no Apple root CA configured; Apple receipt verification is disabled");
            None
        }
    };
    let adapters = Arc::new(DefaultAdapterFactory::new(apple_root_ca));
    let delivery_signal = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = WebhookDispatcher::new(
        pool.clone(),
        delivery_signal.clone(),
        DispatcherConfig::default(),
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx.clone()));

    let scheduler = ProductSyncScheduler::new(
        pool.clone(),
        cryptor.clone(),
        adapters.clone(),
        Duration::from_secs(config.sync.interval_hours * 3600),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let state = AppState {
        pool,
        cryptor,
        adapters,
        delivery_signal,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {addr}");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop accepting work, then give the workers a bounded drain window.
    let _ = shutdown_tx.send(true);
    let drain = Duration::from_secs(config.server.drain_timeout_secs);
    if tokio::time::timeout(drain, async {
        let _ = dispatcher_handle.await;
        let _ = scheduler_handle.await;
    })
    .await
    .is_err()
    {
        tracing::warn!("drain deadline reached; aborting remaining work");
    }

    tracing::info!("OpenCat server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
