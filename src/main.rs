use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mintwatch::alerts::{AlertBus, BusNotifier, MemoryAlertStore};
use mintwatch::config::{AppConfig, LoggingConfig};
use mintwatch::market::DexScreenerClient;
use mintwatch::monitor::MonitoringService;
use mintwatch::rpc::{ConnectionManager, SolanaConnectionFactory};

const CONFIG_ENV: &str = "MINTWATCH_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "mintwatch.toml";

/// Installs the console layer and the daily rolling file layer described by
/// `logging`. The returned guard flushes the file writer when dropped.
fn init_tracing(logging: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&logging.directory)
        .with_context(|| format!("failed to create log directory {}", logging.directory))?;

    let file_appender = tracing_appender::rolling::daily(&logging.directory, &logging.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    let json_layer = logging.json_file.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(file_writer.clone())
            .json()
            .with_current_span(false)
            .with_span_list(true)
    });
    let text_layer = (!logging.json_file).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
    });

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.filter)?,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(json_layer)
        .with(text_layer)
        .with(filter)
        .init();

    Ok(guard)
}

fn config_path() -> Option<String> {
    std::env::var(CONFIG_ENV)
        .ok()
        .or_else(|| std::env::args().nth(1))
        .or_else(|| Path::new(DEFAULT_CONFIG_FILE).exists().then(|| DEFAULT_CONFIG_FILE.to_string()))
}

/// Logs every notification published on the alert bus until shutdown.
fn spawn_alert_logger(bus: &AlertBus, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
    let mut alerts = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = alerts.recv() => match received {
                    Ok(notification) => info!(
                        recipient = %notification.recipient,
                        alert_id = %notification.alert_id,
                        "\n=== Alert Notification ===\n{}\n==========================",
                        notification.message
                    ),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Alert logger lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    debug!("Alert logger shutting down");
                    break;
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = AppConfig::load(path.as_deref()).context("failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging)?;

    info!("🪙 mintwatch - Solana new token alert monitor");
    info!(
        path = path.as_deref().unwrap_or("<defaults>"),
        log_dir = %config.logging.directory,
        endpoints = config.endpoints.len(),
        poll_interval_ms = config.monitor.poll_interval_ms,
        "Configuration loaded"
    );

    let store = if Path::new(&config.store.alerts_file).exists() {
        MemoryAlertStore::load_from_file(&config.store.alerts_file).context("failed to load alerts")?
    } else {
        warn!(path = %config.store.alerts_file, "Alerts file not found, starting with no alerts");
        MemoryAlertStore::new()
    };

    let connections = Arc::new(ConnectionManager::new(
        &config.endpoints,
        Arc::new(SolanaConnectionFactory::new(config.rpc_timeout())),
        config.retry_policy(),
    ));
    let market = DexScreenerClient::with_settings(
        &config.market.dexscreener_url,
        Duration::from_secs(config.market.timeout_secs),
        Duration::from_secs(config.market.cache_secs),
    )
    .context("failed to build market data client")?;

    let bus = AlertBus::new(config.store.bus_capacity);
    let (shutdown_tx, _) = broadcast::channel(4);
    let logger = spawn_alert_logger(&bus, shutdown_tx.subscribe());

    let service = MonitoringService::new(
        config.monitor_settings(),
        connections,
        Arc::new(market),
        Arc::new(store),
        Arc::new(BusNotifier::new(bus)),
    );
    service.start().await;
    info!("Press Ctrl+C to stop monitoring");

    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    service.stop().await;
    let status = service.status().await;
    info!(
        cycles = status.cycles_completed,
        tokens = status.tokens_evaluated,
        alerts = status.alerts_triggered,
        "Monitoring summary"
    );

    let _ = shutdown_tx.send(());
    if let Err(e) = logger.await {
        warn!("Alert logger task failed: {}", e);
    }

    info!("👋 mintwatch shutdown complete");
    Ok(())
}
