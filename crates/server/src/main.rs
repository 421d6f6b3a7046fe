mod api;
mod auth;
mod cli;
mod router;
mod seed;
mod state;
#[cfg(test)]
mod testing;
mod worker;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use costsync_core::Config;
use costsync_queue::{QueueConsumer, SqsConsumer};
use costsync_store::Stores;
use costsync_sync::{FileSecretManager, HttpPluginManager, SyncOrchestrator};

use crate::cli::{CliArgs, StoreKind};
use crate::state::AppState;
use crate::worker::QueueWorker;

fn load_config() -> Config {
    costsync_core::config::load_dotenv();
    Config::from_env()
}

#[cfg(feature = "postgres")]
async fn postgres_stores(config: &Config) -> anyhow::Result<Stores> {
    Stores::postgres(&config.postgres)
        .await
        .context("failed to connect to PostgreSQL")
}

#[cfg(not(feature = "postgres"))]
async fn postgres_stores(_config: &Config) -> anyhow::Result<Stores> {
    anyhow::bail!("this binary was built without the `postgres` feature")
}

/// Resolves once Ctrl-C is received, after telling the worker to stop.
async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = load_config();
    config.log_summary();
    debug!(config = %config.redacted_summary(), "effective configuration");
    info!(store = ?args.store, mode = ?args.mode, "starting costsync");

    let stores = match args.store {
        StoreKind::Memory => Stores::memory(),
        StoreKind::Postgres => postgres_stores(&config).await?,
    };
    if let Some(path) = &args.seed {
        seed::load(&stores, path).await?;
    }

    let plugins = HttpPluginManager::new(&config.plugin).context("failed to build plugin client")?;
    let secrets = FileSecretManager::new(&config.secrets.file);
    let orchestrator = Arc::new(SyncOrchestrator::from_stores(
        &stores,
        Arc::new(plugins),
        Arc::new(secrets),
        config.sync.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut queue: Option<Arc<dyn QueueConsumer>> = None;
    let worker = if args.mode.runs_worker() {
        let consumer: Arc<dyn QueueConsumer> = Arc::new(
            SqsConsumer::new(&config.aws, &config.queue)
                .await
                .context("failed to create queue consumer")?,
        );
        queue = Some(consumer.clone());
        let worker = QueueWorker::new(consumer, orchestrator.clone(), config.queue.batch_size);
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { worker.run(rx).await }))
    } else {
        None
    };

    if args.mode.serves_http() {
        if config.auth.api_tokens.is_empty() {
            warn!("no API_TOKENS configured; every /v1 request will be rejected");
        }
        let mut state = AppState::new(orchestrator, config.auth.api_tokens.clone());
        if let Some(queue) = queue {
            state = state.with_queue(queue);
        }
        let state = Arc::new(state);
        let app = router::build_router(state);

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("Server listening on http://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await?;
    } else {
        shutdown_signal(shutdown_tx).await;
    }

    if let Some(handle) = worker {
        handle.await.context("queue worker panicked")?;
    }
    info!("costsync stopped");
    Ok(())
}
