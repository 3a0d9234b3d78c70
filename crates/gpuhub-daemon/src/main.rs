//! gpuhub daemon
//!
//! Owns the allocation store and serves the allocator over REST.

use anyhow::Context;
use clap::Parser;
use gpuhub_api::create_router;
use gpuhub_core::{DaemonConfig, LoggingConfig, StrategyKind};
use gpuhub_scheduler::{AllocatorService, GpuResourceAllocator};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// gpuhub daemon - persistent GPU slot allocator
#[derive(Parser, Debug)]
#[command(name = "gpuhubd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Resource catalog file ("hostname #gpus [driver]" per line)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Allocation table file
    #[arg(long)]
    store: Option<PathBuf>,

    /// Placement strategy
    #[arg(long)]
    strategy: Option<StrategyKind>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)?,
            None => DaemonConfig::default(),
        };

        if let Some(address) = self.address {
            config.api.address = address;
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(catalog) = self.catalog {
            config.allocator.catalog_path = catalog;
        }
        if let Some(store) = self.store {
            config.allocator.store_path = store;
        }
        if let Some(strategy) = self.strategy {
            config.allocator.strategy = strategy;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        Ok(config)
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = if logging.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.logging);

    info!("Starting gpuhub daemon v{}", env!("CARGO_PKG_VERSION"));
    info!(
        catalog = %config.allocator.catalog_path.display(),
        store = %config.allocator.store_path.display(),
        strategy = %config.allocator.strategy,
        "Allocator configured"
    );

    let allocator = GpuResourceAllocator::from_config(&config.allocator);
    let handle = AllocatorService::spawn(allocator).context("Failed to start allocator service")?;

    let router = create_router(handle);

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("Invalid listen address")?;

    info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, router).await.context("Server error")?;

    Ok(())
}
