//! Agar state sync node
//!
//! Relay mode subscribes to the game contract, keeps the authoritative
//! participant set and serves observers over WebSocket and HTTP.
//! Observer mode runs a read-only headless client against a relay, falling
//! back to direct ledger polling while the relay is unreachable. It holds no
//! signing key, so it follows state but never submits actions.

use agar_state::{ActionTracker, BlockCursor, ParticipantStore};
use agar_types::Address;
use anyhow::{Context, Result};
use broadcast_hub::{BroadcastHub, HttpServer, WebSocketServer};
use chain_relay::{ChainRelay, EvmLedger, LedgerClient};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use sync_client::{ClientRuntime, ClientUpdate};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// Node mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Relay mode - mirror the contract and serve observers
    Relay,
    /// Observer mode - read-only headless client of a relay (submits no actions)
    Observer,
}

/// Agar state synchronization node
#[derive(Parser, Debug)]
#[command(name = "agar-sync")]
#[command(about = "Chain event relay and observer for the agar game contract", long_about = None)]
struct Args {
    /// Node mode (relay or observer)
    #[arg(long, value_enum, default_value = "relay")]
    mode: Mode,

    /// Ledger JSON-RPC WebSocket URL
    #[arg(long, env = "AGAR_RPC_URL", default_value = "ws://127.0.0.1:8546")]
    rpc_url: String,

    /// Game contract address
    #[arg(long, env = "AGAR_CONTRACT")]
    contract: String,

    /// WebSocket bind address (relay mode)
    #[arg(long, default_value = "127.0.0.1:3002")]
    ws_addr: String,

    /// HTTP bind address (relay mode)
    #[arg(long, default_value = "127.0.0.1:3001")]
    http_addr: String,

    /// Relay push channel URL (observer mode)
    #[arg(long, default_value = "ws://127.0.0.1:3002")]
    hub_url: String,

    /// Participant address to follow (observer mode is read-only and submits no actions)
    #[arg(long, env = "AGAR_PARTICIPANT")]
    participant: Option<String>,

    /// JSON file overriding timings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
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

    let config = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => NodeConfig::default(),
    };

    let contract = Address::parse(&args.contract).context("invalid contract address")?;
    let ledger: Arc<dyn LedgerClient> = Arc::new(
        EvmLedger::new(args.rpc_url.clone(), contract).with_request_timeout(config.request_timeout()),
    );

    match args.mode {
        Mode::Relay => run_relay(args, config, ledger).await,
        Mode::Observer => run_observer(args, config, ledger).await,
    }
}

/// Run in relay mode - mirror the contract and serve observers
async fn run_relay(args: Args, config: NodeConfig, ledger: Arc<dyn LedgerClient>) -> Result<()> {
    tracing::info!("Starting agar sync - RELAY MODE");
    tracing::info!("  Ledger: {}", args.rpc_url);
    tracing::info!("  Contract: {}", args.contract);
    tracing::info!("  WebSocket: {}", args.ws_addr);
    tracing::info!("  HTTP: {}", args.http_addr);

    let relay = ChainRelay::new(
        config.relay_config(),
        ledger,
        ParticipantStore::new(),
        ActionTracker::new(),
        BlockCursor::new(),
    );

    // Connects in the background; failures go through the reconnect path
    relay.start();

    let hub = Arc::new(BroadcastHub::new(
        relay.clone(),
        config.hub_config(&args.ws_addr, &args.http_addr),
    ));

    // Start HTTP server
    let http_hub = hub.clone();
    let http_addr = args.http_addr.clone();
    let http_server = tokio::spawn(async move {
        let server = HttpServer::new(http_hub);
        if let Err(e) = server.run(&http_addr).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    // Start WebSocket server
    let ws_hub = hub.clone();
    let ws_addr = args.ws_addr.clone();
    let ws_server = tokio::spawn(async move {
        let server = WebSocketServer::new(ws_hub);
        if let Err(e) = server.run(&ws_addr).await {
            tracing::error!("WebSocket server error: {}", e);
        }
    });

    tracing::info!("Relay running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    relay.stop();
    http_server.abort();
    ws_server.abort();

    tracing::info!(
        "Relay stopped at height {} with {} participants",
        relay.height(),
        relay.store().len()
    );

    Ok(())
}

/// Run in observer mode - follow a relay
async fn run_observer(args: Args, config: NodeConfig, ledger: Arc<dyn LedgerClient>) -> Result<()> {
    tracing::info!("Starting agar sync - OBSERVER MODE");
    tracing::info!("  Relay: {}", args.hub_url);
    tracing::info!("  Ledger fallback: {}", args.rpc_url);
    tracing::info!("  Read-only: actions are not submitted in observer mode");

    let me = args
        .participant
        .as_deref()
        .map(Address::parse)
        .transpose()
        .context("invalid participant address")?;

    let client = ClientRuntime::new(config.client_config(&args.hub_url), ledger, me, None);
    let mut updates = client.subscribe();
    client.start().await?;

    tracing::info!("Observer running. Press Ctrl+C to stop.");

    let reporter = client.clone();
    let report_task = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(ClientUpdate::Transport(state)) => tracing::info!("Transport: {:?}", state),
                Ok(ClientUpdate::Outcome(outcome)) => {
                    tracing::info!("{} {}: {:?}", outcome.kind, outcome.action_id, outcome.status)
                }
                Ok(ClientUpdate::Participants) => {
                    tracing::debug!("{} participants", reporter.participants().len())
                }
                Ok(ClientUpdate::Height(height)) => tracing::debug!("Height {}", height),
                Ok(ClientUpdate::Queue) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!("Update reporter lagged {} messages", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down observer...");
    client.stop();
    report_task.abort();

    tracing::info!("Observer stopped");

    Ok(())
}
