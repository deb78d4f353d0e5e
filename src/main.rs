use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use tick_ratio::config::{Config, HistoryBackend, LoggingConfig, SourceKind};
use tick_ratio::feed::{BinanceBookTicker, FeedSource, ReplayFeed};
use tick_ratio::history::{JsonFileHistory, MemoryHistory};
use tick_ratio::monitor::{FeedMonitor, MonitorSettings};
use tick_ratio::report::ConsoleReporter;

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::try_new(&logging.level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });

    match &logging.file {
        // JSON lines to a file so logs never interleave with the report output.
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(log_file)
                .with_ansi(false)
                .json()
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .compact()
                .init();
        }
    }
    Ok(())
}

async fn run_with_source<S: FeedSource>(
    config: &Config,
    source: S,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let settings = MonitorSettings::from_config(config);
    let sink = ConsoleReporter::stdout(config.report.color);
    match config.history.backend {
        HistoryBackend::File => {
            let persistence = JsonFileHistory::open(&config.history.dir).with_context(|| {
                format!("failed to open history dir {}", config.history.dir.display())
            })?;
            FeedMonitor::new(settings, source, persistence, sink)
                .run(shutdown)
                .await
        }
        HistoryBackend::Memory => {
            FeedMonitor::new(settings, source, MemoryHistory::new(), sink)
                .run(shutdown)
                .await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set TICK_RATIO_CONFIG or provide config/default.toml");
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging)?;

    tracing::info!(
        feeds = config.feeds.len(),
        source = ?config.source.kind,
        history = ?config.history.backend,
        history_dir = %config.history.dir.display(),
        "Starting tick-ratio"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stopped_by_user = shutdown_rx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for interrupt");
                // Keep the sender alive so the monitor keeps running.
                std::future::pending::<()>().await;
            }
        }
    });

    let result = match config.source.kind {
        SourceKind::Binance => {
            let source = BinanceBookTicker::new(
                &config.source.rest_base_url,
                Duration::from_secs(config.source.availability_ttl_secs),
            )
            .context("failed to build HTTP client")?;
            run_with_source(&config, source, shutdown_rx).await
        }
        SourceKind::Replay => {
            let path = config
                .source
                .replay_path
                .as_deref()
                .context("source.replay_path is not set")?;
            let source = ReplayFeed::from_file(path)?;
            run_with_source(&config, source, shutdown_rx).await
        }
    };

    if *stopped_by_user.borrow() {
        println!("Monitoring stopped by user.");
    }
    tracing::info!("Shutdown complete");
    result
}
