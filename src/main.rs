use std::path::Path;
use std::sync::Arc;

use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use xtables::metrics;
use xtables::store::load_backup;
use xtables::store::save_backup;
use xtables::store::Store;
use xtables::utils::file_io::open_log_file;
use xtables::Error;
use xtables::Result;
use xtables::XTablesConfig;
use xtables::XTablesServer;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let settings = XTablesConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&settings.server.log_dir)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    if settings.monitoring.prometheus_enabled {
        tokio::spawn(metrics::start_server(settings.monitoring.prometheus_port, graceful_rx.clone()));
    }

    let server = XTablesServer::bind(settings.server.clone(), settings.store.clone()).await?;
    let store = server.store();

    if let Some(path) = &settings.store.restore_from {
        restore(&store, path).await;
    }

    info!(addr = %server.local_addr()?, "XTables started. Waiting for CTRL+C signal...");
    // Listen on Shutdown Signal
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    if let Err(e) = server.run(graceful_rx).await {
        error!("server stops: {:?}", e);
    }

    if let Some(path) = &settings.store.backup_on_shutdown {
        if let Err(e) = save_backup(&store, path, "saved on shutdown").await {
            error!("{e}");
        }
    }

    info!("Exiting program.");
    Ok(())
}

async fn restore(
    store: &Arc<Store>,
    path: &Path,
) {
    if !path.exists() {
        warn!(?path, "no backup to restore, starting empty");
        return;
    }
    match load_backup(store, path).await {
        Ok(document) => info!(?path, saved_at = document.saved_at, keys = store.size(), "store restored"),
        Err(e) => error!("{e}"),
    }
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::SignalSenderClosed(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown signal sent");
    Ok(())
}

fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    let log_file = open_log_file(log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
