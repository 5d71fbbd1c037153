//! sxm maker bot - Entry Point
//!
//! Quotes one instrument against the paper venue using the live mark
//! price feed.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sxm_bot::{resolve_config_path, AppConfig, AppError, Supervisor};
use sxm_feed::FeedConnection;
use sxm_gateway::PaperGateway;
use sxm_telemetry::Alerter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Two-sided maker quoting bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SXM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    sxm_feed::init_crypto();

    let args = Args::parse();

    sxm_telemetry::init_logging()?;

    info!("Starting sxm-bot v{}", env!("CARGO_PKG_VERSION"));

    let config_path = resolve_config_path(args.config);
    info!(config_path = %config_path, "Loading configuration");

    let config = AppConfig::from_file(&config_path)?;
    config.validate()?;
    info!(symbol = %config.symbol, "Configuration loaded");

    let shutdown = CancellationToken::new();

    // Metrics endpoint
    let metrics_handle = if config.telemetry.metrics_port > 0 {
        let port = config.telemetry.metrics_port;
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = sxm_telemetry::run_metrics_server(port, token).await {
                error!(error = %e, "Metrics server failed");
            }
        }))
    } else {
        None
    };

    // Venue
    let (events_tx, events_rx) = mpsc::channel(1024);
    let gateway = Arc::new(PaperGateway::new(config.gateway.paper.clone(), events_tx.clone()));

    let supervisor = Supervisor::new(&config, gateway.clone(), (events_tx, events_rx))?
        .with_alerter(Alerter::new(&config.alert)?)
        .with_shutdown_token(shutdown.child_token());
    let matcher_handle = gateway.spawn_matcher(supervisor.marks());

    // Price feed
    let (price_tx, price_rx) = mpsc::channel(1000);
    let feed = Arc::new(FeedConnection::new(
        config.feed.clone(),
        config.symbol.clone(),
        price_tx,
    ));
    let feed_clone = feed.clone();
    let feed_handle = tokio::spawn(async move {
        if let Err(e) = feed_clone.run().await {
            error!(error = %e, "Price feed stopped");
        }
    });

    // Ctrl-C starts the drain
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let result = supervisor.run(price_rx).await;

    feed.shutdown();
    shutdown.cancel();
    let _ = feed_handle.await;
    matcher_handle.abort();
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    match result {
        Ok(report) => {
            info!(cancelled = report.cancelled, swept = report.swept, "Exited cleanly");
            Ok(())
        }
        Err(e @ AppError::ShutdownTimeout { .. }) => {
            error!(error = %e, "Exiting with unconfirmed orders");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
