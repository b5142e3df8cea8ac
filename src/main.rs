//! IOC Reputation Agent CLI.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zentinel_agent_ioc_reputation::feeds::HttpFetcher;
use zentinel_agent_ioc_reputation::rpc::{RpcServer, TransportConfig};
use zentinel_agent_ioc_reputation::{Config, IngestionScheduler, LookupService, ReputationStore};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-ioc-reputation")]
#[command(about = "IOC reputation agent for Zentinel - ingest threat intelligence IP feeds and answer benign/malicious lookups")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ioc-reputation.yaml")]
    config: PathBuf,

    /// Unix socket path
    #[arg(short, long, default_value = "/tmp/zentinel-ioc-reputation.sock")]
    socket: PathBuf,

    /// TCP lookup address (e.g., "127.0.0.1:50052")
    #[arg(long, value_name = "ADDR")]
    tcp_address: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    if args.validate {
        info!(feeds = config.feeds.len(), "Configuration is valid");
        return Ok(());
    }

    let store = Arc::new(ReputationStore::new());
    let fetcher = Arc::new(HttpFetcher::new(&config.ingestion)?);
    let scheduler = IngestionScheduler::new(&config, store.clone(), fetcher).spawn();
    let lookup = Arc::new(LookupService::new(store, &config));

    let transport = match args.tcp_address {
        Some(tcp_address) => {
            info!(
                tcp_address = %tcp_address,
                socket = %args.socket.display(),
                "Starting IOC reputation agent with TCP and UDS"
            );
            TransportConfig::Both {
                tcp_address,
                uds_path: args.socket,
            }
        }
        None => {
            info!(socket = %args.socket.display(), "Starting IOC reputation agent with UDS");
            TransportConfig::Uds { path: args.socket }
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    let served = RpcServer::new(lookup).run(transport, shutdown).await;
    scheduler.shutdown().await;
    served
}
