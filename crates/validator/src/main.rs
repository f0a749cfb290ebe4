//! Coprocessor Validator Node
//!
//! Main entry point for a coprocessor validator. Every node runs the same
//! binary; whichever node the current round elects dispatches submitted tasks
//! to the compute gateway, the others record attestations.
//! State is in-memory only and is lost on restart.

use anyhow::Result;
use clap::Parser;
use coproc_consensus::{Clock, SystemClock};
use coproc_runtime::{ComputeGateway, Coordinator, GatewayRequest, HttpGateway};
use rpc_server::HttpServer;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::{generate_identity, NodeConfig, DEFAULT_GATEWAY_ENDPOINT};

/// Payload sent by the startup gateway probe
const PROBE_PAYLOAD: &str = "test_encrypted_data";

/// Coprocessor validator node
#[derive(Parser, Debug)]
#[command(name = "coprocessor")]
#[command(about = "Leader-rotating validator node for encrypted computation", long_about = None)]
struct Args {
    /// Validator identity (generated if omitted)
    #[arg(long, env = "COPROC_IDENTITY")]
    identity: Option<String>,

    /// Comma-separated validator identities known at startup
    #[arg(long, value_delimiter = ',', default_value = "0x3333,0x4444,0x5555")]
    validators: Vec<String>,

    /// HTTP bind address
    #[arg(long, env = "COPROC_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// Compute gateway endpoint
    #[arg(long, env = "COPROC_GATEWAY", default_value = DEFAULT_GATEWAY_ENDPOINT)]
    gateway_endpoint: String,

    /// Gateway call timeout in seconds
    #[arg(long, default_value = "30")]
    gateway_timeout_secs: u64,

    /// Election round length in seconds
    #[arg(long, default_value = "100")]
    round_window_secs: u64,

    /// Periodic re-election interval in seconds
    #[arg(long, default_value = "10")]
    sync_interval_secs: u64,

    /// Send a test payload to the gateway at startup
    #[arg(long)]
    probe_gateway: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            identity: self.identity.clone().unwrap_or_else(generate_identity),
            validators: self.validators.clone(),
            http_addr: self.http_addr.clone(),
            gateway_endpoint: self.gateway_endpoint.clone(),
            gateway_timeout_secs: self.gateway_timeout_secs,
            round_window_secs: self.round_window_secs,
            sync_interval_secs: self.sync_interval_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.node_config();
    config.validate()?;
    run_node(config, args.probe_gateway).await
}

async fn run_node(config: NodeConfig, probe: bool) -> Result<()> {
    tracing::info!("Starting coprocessor node");
    tracing::info!("  Identity: {}", config.identity);
    tracing::info!("  HTTP API: {}", config.http_addr);
    tracing::info!("  Gateway: {}", config.gateway_endpoint);
    tracing::info!("  Round window: {}s", config.round_window_secs);
    tracing::debug!("Effective config: {}", serde_json::to_string(&config)?);

    let gateway = Arc::new(HttpGateway::new(
        config.gateway_endpoint.clone(),
        config.gateway_timeout(),
    )?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let coordinator = Arc::new(Coordinator::new(
        config.coordinator_config(),
        gateway.clone(),
        clock.clone(),
    ));

    tracing::info!(
        "  Validators: {}",
        coordinator.registry().all_validators().join(", ")
    );
    match coordinator.current_leader() {
        Ok(view) => tracing::info!(
            "Round {} leader: {} (local role: {:?})",
            view.round,
            view.leader,
            coordinator.status().role
        ),
        Err(e) => tracing::warn!("No leader at startup: {}", e),
    }

    if probe {
        let identity = config.identity.clone();
        let timestamp = clock.unix_seconds() as i64;
        tokio::spawn(probe_gateway(gateway, identity, timestamp));
    }

    // Periodic re-election and the HTTP API both stop via the shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_coordinator = coordinator.clone();
    let sync_interval = config.sync_interval();
    let sync_shutdown = shutdown_rx.clone();
    let sync_loop = tokio::spawn(async move {
        sync_coordinator
            .run_sync_loop(sync_interval, sync_shutdown)
            .await;
    });

    // HTTP API
    let http_coordinator = coordinator.clone();
    let http_addr = config.http_addr.clone();
    let mut http_shutdown = shutdown_rx;
    let mut http_server = tokio::spawn(async move {
        HttpServer::new(http_coordinator)
            .run(&http_addr, async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tracing::info!("Node running. Press Ctrl+C to stop.");

    let server_result = tokio::select! {
        result = &mut http_server => Some(result),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            None
        }
    };

    // Stop intake first, then the sync loop, then join every dispatch
    let _ = shutdown_tx.send(true);
    let server_result = match server_result {
        Some(result) => result,
        None => http_server.await,
    };
    if let Err(e) = sync_loop.await {
        tracing::error!("Sync loop failed: {}", e);
    }
    let joined = coordinator.wait_for_dispatches().await;
    tracing::info!("Joined {} in-flight dispatches", joined);

    // An early server exit (e.g. the port could not be bound) is fatal
    server_result??;
    tracing::info!("Node stopped");
    Ok(())
}

/// Send a test payload to the gateway and log the outcome
async fn probe_gateway(gateway: Arc<HttpGateway>, identity: String, timestamp: i64) {
    tracing::info!("Probing gateway {}", gateway.endpoint());
    let request = GatewayRequest::new(PROBE_PAYLOAD, identity, timestamp);
    match gateway.execute(request).await {
        Ok(response) => tracing::info!("Gateway probe succeeded: {}", response.result),
        Err(e) => tracing::warn!("Gateway probe failed: {}", e),
    }
}
