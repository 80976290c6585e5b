//! Intercom relay binary entry point.
//!
//! Usage: intercom-relay --rabbitmq-url <url> --queue-name <name> --api-token <token>
//!
//! Every flag can also come from the environment. An API token of `mock`
//! logs messages instead of sending them.

use clap::Parser;
use intercom_relay::config::DEFAULT_API_BASE_URL;
use intercom_relay::{build_client, AmqpBroker, Relay, RelayConfig, RelayResult};
use observability::LogFormat;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Relays queued messages from RabbitMQ to the Intercom REST API.
#[derive(Parser, Debug)]
#[command(name = "intercom-relay")]
#[command(about = "Relays queued messages from RabbitMQ to the Intercom REST API")]
struct Args {
    /// AMQP URL of the broker.
    #[arg(long, env = "CJW_RABBITMQ_HOST")]
    rabbitmq_url: String,

    /// Durable queue to consume.
    #[arg(long, env = "CJW_INTERCOM_QUEUE_NAME")]
    queue_name: String,

    /// Intercom access token, or "mock" to log instead of sending.
    #[arg(long, env = "CJW_INTERCOM_API_TOKEN", hide_env_values = true)]
    api_token: String,

    /// Intercom API base URL.
    #[arg(long, env = "INTERCOM_API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    api_base_url: String,

    /// Timeout for one API request, in seconds.
    #[arg(long, env = "INTERCOM_REQUEST_TIMEOUT_SECS", default_value = "5")]
    request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Stderr log format (compact, json)
    #[arg(long, env = "RELAY_LOG_FORMAT", default_value = "compact")]
    log_format: LogFormat,

    /// Also append JSON logs to this file.
    #[arg(long, env = "RELAY_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> RelayResult<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "intercom-relay".into(),
        default_level: args.log_level.clone(),
        format: args.log_format,
        log_path: args.log_file.clone(),
    })?;

    info!("Intercom relay starting...");

    let mut config = RelayConfig::new(args.rabbitmq_url, args.queue_name, args.api_token);
    config.api.base_url = args.api_base_url;
    config.api.request_timeout = Duration::from_secs(args.request_timeout_secs);
    config.validate()?;

    info!(
        queue = %config.broker.queue_name,
        api_base_url = %config.api.base_url,
        api_mode = ?config.api.mode,
        request_timeout_secs = config.api.request_timeout.as_secs(),
        "Configuration loaded"
    );

    let client = build_client(&config.api)?;
    let relay = Relay::new(config.broker, AmqpBroker::new(), client);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, exiting...");
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = relay.run(shutdown_rx).await {
        error!(error = %e, "Relay exited with error");
        return Err(e);
    }

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM; only Ctrl-C will stop the relay");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
