//! json2mqtt - Main Entry Point
//!
//! Reads newline-delimited JSON from stdin and publishes each object to MQTT.

use json2mqtt::cli::Cli;
use json2mqtt::config::BridgeConfig;
use json2mqtt::error::{BridgeResult, EXIT_CONFIG};
use json2mqtt::observability::init_logging_with_verbosity;
use json2mqtt::transport::Transport;
use json2mqtt::{IngestLoop, IngestSummary, MqttSession};
use std::process;
use tokio::io::BufReader;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = match Cli::parse_with_arg_files() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("json2mqtt: {e}");
            process::exit(EXIT_CONFIG);
        }
    };

    init_logging_with_verbosity(cli.verbose);

    let print_config = cli.print_config;
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };

    if print_config {
        match config.to_toml() {
            Ok(rendered) => {
                print!("{rendered}");
                process::exit(0);
            }
            Err(e) => {
                error!("{}", e);
                process::exit(EXIT_CONFIG);
            }
        }
    }

    // Exit explicitly: a blocking stdin read would otherwise hold up runtime
    // shutdown after a signal.
    match run_bridge(config).await {
        Ok(summary) => {
            info!(
                published = summary.published,
                skipped = summary.skipped,
                "Bridge shutdown complete"
            );
            process::exit(0);
        }
        Err(e) => {
            error!("{}", e);
            process::exit(e.exit_code());
        }
    }
}

async fn run_bridge(config: BridgeConfig) -> BridgeResult<IngestSummary> {
    info!(
        broker = %config.broker.host,
        port = config.broker.port,
        prefix = %config.topic.prefix,
        "Starting json2mqtt v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut session = MqttSession::new(&config)?;
    session.start().await?;

    let mut ingest = IngestLoop::new(config, session);
    ingest
        .run_until(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            shutdown_signal(),
        )
        .await
}

/// Resolves on SIGINT or SIGTERM
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::warn;

    match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully...");
                }
            }
        }
        _ => {
            warn!("Failed to install signal handlers, falling back to Ctrl-C");
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down gracefully..."),
                Err(_) => std::future::pending::<()>().await,
            }
        }
    }
}

/// Resolves on Ctrl-C
#[cfg(not(unix))]
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down gracefully..."),
        Err(_) => std::future::pending::<()>().await,
    }
}
