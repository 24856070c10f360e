use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use garp_shipping_connector::carriers::{CarrierRegistry, DhlClient};
use garp_shipping_connector::config::ConnectorConfig;
use garp_shipping_connector::notifications::Mailer;
use garp_shipping_connector::pipeline::{
    self, Processor, ProcessorDeps, spawn_watcher, spawn_workers,
};
use garp_shipping_connector::printing::LabelPrinter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Configuration path: first argument or connector.toml next to the exe
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("connector.toml"));

    let config = match ConnectorConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    if let Err(e) = config.paths.ensure_all() {
        eprintln!("Error: Failed to create directories: {e}");
        std::process::exit(1);
    }

    // Initialize tracing — console plus a daily-rolling file log
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let _log_guard = if config.logging.file_output {
        let file_appender =
            tracing_appender::rolling::daily(&config.paths.log_dir, "garp-shipping-connector.log");
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(false),
            )
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
        None
    };

    eprintln!("📦 GARP Shipping Connector v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Watching: {}", config.paths.watch_dir.display());
    eprintln!("   Carrier API: {}", config.dhl.base_url);
    eprintln!(
        "   Workers: {} (queue depth {})",
        config.pipeline.workers, config.pipeline.queue_depth
    );
    match &config.smtp {
        Some(smtp) => eprintln!("   Email: enabled (SMTP: {})", smtp.host),
        None => eprintln!("   Email: disabled"),
    }

    // Crash recovery: re-queue files stranded in Processing
    match pipeline::claim::recover_stale(&config.paths.processing_dir, &config.paths.watch_dir) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "Recovered stale claims from previous run"),
        Err(e) => tracing::warn!("Stale claim recovery failed: {e}"),
    }

    // Wire up the pipeline
    let mut carriers = CarrierRegistry::new();
    carriers.register(Arc::new(DhlClient::new(
        config.dhl.clone(),
        config.sender.clone(),
    )));

    let mailer = config.smtp.clone().map(|smtp| Arc::new(Mailer::new(smtp)));

    let processor = Arc::new(Processor::new(
        config.paths.clone(),
        config.pipeline.clone(),
        ProcessorDeps {
            carriers: Arc::new(carriers),
            printer: Arc::new(LabelPrinter::new(config.printers.clone())),
            mailer,
        },
    ));

    let (tx, rx) = tokio::sync::mpsc::channel(config.pipeline.queue_depth);
    let (watcher_handle, watcher_shutdown) =
        spawn_watcher(config.paths.watch_dir.clone(), config.watcher.clone(), tx);
    let (worker_handles, worker_shutdown) =
        spawn_workers(config.pipeline.workers, rx, processor);

    tracing::info!("Connector started, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    // Shutdown: stop emitting, let in-flight items finish, leave the rest
    tracing::info!("Shutting down...");
    watcher_shutdown.store(true, Ordering::Relaxed);
    worker_shutdown.store(true, Ordering::Relaxed);
    watcher_handle.await?;
    for result in futures::future::join_all(worker_handles).await {
        result?;
    }

    tracing::info!("Stopped");
    Ok(())
}
