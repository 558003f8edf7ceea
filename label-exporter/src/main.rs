//! Prometheus exporter for pod labels.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use label_exporter_common::init_tracing;
use tokio::sync::watch;
use tracing::{error, info, warn};

use label_exporter::{
    EntityWatcher, EventDispatcher, ExporterConfig, ExporterMetrics, HttpServer, LabelFilter,
    LabelIndex, build_registry,
};
use label_exporter_common::config::ZenohConfig;

/// Prometheus exporter for pod labels.
#[derive(Parser, Debug)]
#[command(name = "label-exporter")]
#[command(about = "Export pod labels as Prometheus metric labels")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    address: Option<String>,

    /// Path of the metrics endpoint (overrides config).
    #[arg(long)]
    metrics_path: Option<String>,

    /// Only export labels whose name contains this substring (overrides config).
    #[arg(long)]
    label_prefix: Option<String>,

    /// Export every label of every pod.
    #[arg(long)]
    expose_all: bool,

    /// Zenoh endpoint of the event source; switches to client mode.
    #[arg(long)]
    connect: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(address) = self.address {
            config.http.listen = address;
        }
        if let Some(path) = self.metrics_path {
            config.http.path = path;
        }
        if let Some(prefix) = self.label_prefix {
            config.labels.prefix = prefix;
        }
        if self.expose_all {
            config.labels.expose_all = true;
        }
        if !self.connect.is_empty() {
            config.zenoh = ZenohConfig::client(self.connect);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging)?;

    let index = Arc::new(LabelIndex::new(config.labels.cleanup));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        label_prefix = %config.labels.prefix,
        expose_all = config.labels.expose_all,
        cleanup = index.cleanup_strategy().as_str(),
        "Starting label exporter"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = ExporterMetrics::default();
    let registry = build_registry(index.clone(), &metrics);
    let dispatcher = Arc::new(EventDispatcher::new(
        index.clone(),
        LabelFilter::new(&config.labels),
        metrics.clone(),
    ));

    let listen_addr: SocketAddr = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Create components
    let watcher = EntityWatcher::new(dispatcher, config.zenoh.clone())
        .with_key_prefix(config.source.key_prefix.clone())
        .with_sync_timeout(Duration::from_secs(config.source.sync_timeout_secs));
    let http_server = HttpServer::new(
        registry,
        watcher.sync_status(),
        listen_addr,
        config.http.path.clone(),
    );

    let mut watcher_task = tokio::spawn(watcher.run(shutdown_rx.clone()));
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx.clone()));

    // Wait for a shutdown signal or for a task to stop on its own
    let mut failure: Option<anyhow::Error> = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = &mut watcher_task => {
            failure = Some(match result {
                Ok(Ok(())) => anyhow::anyhow!("Watcher stopped unexpectedly"),
                Ok(Err(e)) => e.into(),
                Err(e) => anyhow::anyhow!("Watcher task failed: {}", e),
            });
        }
        result = &mut http_task => {
            failure = Some(match result {
                Ok(Ok(())) => anyhow::anyhow!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow::anyhow!("HTTP server task failed: {}", e),
            });
        }
    }

    if let Some(e) = &failure {
        error!(error = %e, "Exporter failed");
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for tasks to complete
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        if !watcher_task.is_finished() {
            let _ = (&mut watcher_task).await;
        }
        if !http_task.is_finished() {
            let _ = (&mut http_task).await;
        }
    })
    .await;
    if stopped.is_err() {
        warn!("Tasks did not stop within 5s");
    }

    // Print final stats
    let (entities, known_labels) = index.counts();
    info!(
        events = metrics.total_events(),
        entities,
        known_labels,
        "Final statistics"
    );

    match failure {
        Some(e) => Err(e),
        None => {
            info!("Exporter stopped");
            Ok(())
        }
    }
}

/// Resolve when the process receives SIGTERM.
async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
