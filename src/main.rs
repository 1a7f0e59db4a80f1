use std::sync::Arc;

use kv_watcher::Error;
use kv_watcher::Listener;
use kv_watcher::Result;
use kv_watcher::WatchRegistry;
use kv_watcher::WatcherConfig;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Logs every notification of the watches configured in `watch.targets`
struct LoggingListener;

impl Listener for LoggingListener {
    fn set(
        &self,
        key: &[u8],
        value: &[u8],
    ) {
        info!(key = %String::from_utf8_lossy(key), value = %String::from_utf8_lossy(value), "Set");
    }

    fn create(
        &self,
        key: &[u8],
        value: &[u8],
    ) {
        info!(key = %String::from_utf8_lossy(key), value = %String::from_utf8_lossy(value), "Create");
    }

    fn modify(
        &self,
        key: &[u8],
        value: &[u8],
    ) {
        info!(key = %String::from_utf8_lossy(key), value = %String::from_utf8_lossy(value), "Modify");
    }

    fn delete(
        &self,
        key: &[u8],
    ) {
        info!(key = %String::from_utf8_lossy(key), "Delete");
    }

    fn session_failed(
        &self,
        key: &str,
        error: &Error,
    ) {
        error!(key, "Watch stopped: {}", error);
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WatcherConfig::new()?.validate()?;
    info!(?config, "Starting kv-watcher");

    let registry = WatchRegistry::connect(&config).await?;

    let listener: Arc<dyn Listener> = Arc::new(LoggingListener);
    for target in &config.watch.targets {
        if !registry.add_watch(target.key.clone(), target.prefix, listener.clone()) {
            warn!(key = %target.key, "Duplicate watch target skipped");
        }
    }
    if registry.watch_count() == 0 {
        warn!("No watch targets configured; set [[watch.targets]] in the config file");
    }

    if let Err(e) = wait_for_shutdown_signal().await {
        error!("Failed to listen for shutdown signal: {:?}", e);
    }

    registry.close(true).await;
    info!("Shutdown completed");
    Ok(())
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    Ok(())
}
