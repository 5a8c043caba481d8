use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use runbox::api::{self, AppState};
use runbox::config::{Config, StorageProvider};
use runbox::dispatch::{JobListener, JobPublisher};
use runbox::ledger::FjallStore;
use runbox::observability::Metrics;
use runbox::queue::{Broker, FjallQueue};
use runbox::runner::{ContainerRunner, DockerEngine};
use runbox::service::{RunJobHandler, Sweeper};
use runbox::storage::ArchiveStore;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Wire every component and serve until a shutdown signal arrives.
///
/// On shutdown the HTTP server stops accepting, the listener stops
/// receiving and waits for in-flight jobs, then both keyspaces are flushed.
pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);
    let metrics = Arc::new(Metrics::new());

    info!(path = %config.server.ledger_path().display(), "Opening Fjall store");
    let store = Arc::new(FjallStore::open(config.server.ledger_path())?);

    info!(path = %config.server.queue_path().display(), "Opening FjallQueue");
    let queue = Arc::new(FjallQueue::open(config.server.queue_path())?);
    let broker = Broker::new(
        queue.clone(),
        config.dispatch.broker_settings(),
        metrics.clone(),
    );

    let archives = match config.storage.provider {
        StorageProvider::Local => ArchiveStore::local(&config.storage.root)?,
        StorageProvider::Memory => {
            warn!("Archives are kept in memory and lost on restart");
            ArchiveStore::in_memory()
        }
    };

    let engine = DockerEngine::connect(config.runner.docker_socket.as_deref())?;
    if let Err(e) = engine.ping().await {
        warn!(error = %e, "Docker engine not reachable, jobs will fail until it is");
    }
    let runner = Arc::new(ContainerRunner::new(
        Arc::new(engine),
        config.runner.settings(),
    ));

    let handler = Arc::new(RunJobHandler::new(
        store.clone(),
        Arc::new(archives.clone()),
        runner,
        metrics.clone(),
        config.runner.image_prefix.clone(),
        config.runner.cleanup_images,
    ));

    let cancel = CancellationToken::new();

    let listener = JobListener::new(
        Arc::new(broker.clone()),
        config.dispatch.max_inflight_jobs,
    );
    let listener_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { listener.run(cancel, handler).await })
    };

    let sweeper_task = config.reconcile.enabled.then(|| {
        let sweeper = Sweeper::new(
            store.clone(),
            Duration::from_secs(config.reconcile.stuck_after_secs),
            Duration::from_secs(config.reconcile.interval_secs),
            metrics.clone(),
        );
        let cancel = cancel.clone();
        tokio::spawn(async move { sweeper.run(cancel).await })
    });

    let publisher = JobPublisher::new(Arc::new(broker));
    let state = AppState::new(config, store.clone(), archives, publisher, metrics);
    let app = api::router(state);

    let tcp = TcpListener::bind(address).await?;
    info!(%address, "Runbox API listening");

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    };
    let served = axum::serve(tcp, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await;

    // The server may also stop on its own error
    cancel.cancel();

    match listener_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Job listener failed"),
        Err(e) => error!(error = %e, "Job listener panicked"),
    }
    if let Some(task) = sweeper_task
        && let Err(e) = task.await
    {
        error!(error = %e, "Sweeper panicked");
    }

    store.persist()?;
    queue.flush()?;
    info!("Shutdown complete");

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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
    info!("Shutdown signal received");
}
