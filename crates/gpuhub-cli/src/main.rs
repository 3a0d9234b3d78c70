//! gpuhub CLI
//!
//! Command-line interface for the gpuhub allocator.

mod commands;

use clap::{Parser, Subcommand};
use gpuhub_scheduler::GpuResourceAllocator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// gpuhub - persistent GPU slot allocator
#[derive(Parser, Debug)]
#[command(name = "gpuhub")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:9190", global = true)]
    api: String,

    /// Resource catalog file; with --store, bypasses the daemon
    #[arg(long, global = true, requires = "store")]
    catalog: Option<PathBuf>,

    /// Allocation table file; with --catalog, bypasses the daemon
    #[arg(long, global = true, requires = "catalog")]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get or assign GPUs for a requester
    Assign {
        /// Requester id (e.g. user name)
        requester: String,

        /// Number of GPUs
        #[arg(long, default_value_t = 1)]
        gpus: u32,
    },

    /// Release a requester's GPUs
    Release {
        /// Requester id
        requester: String,
    },

    /// List all allocations
    Ps,

    /// Show per-host occupancy
    Hosts,

    /// Show overall status
    Top,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let backend = match (cli.catalog, cli.store) {
        (Some(catalog), Some(store)) => {
            commands::Backend::Local(Arc::new(GpuResourceAllocator::new(catalog, store)))
        }
        _ => commands::Backend::Remote(commands::ApiClient::new(&cli.api)),
    };

    match cli.command {
        Commands::Assign { requester, gpus } => {
            commands::assign(&backend, requester, gpus).await?;
        }
        Commands::Release { requester } => {
            commands::release(&backend, requester).await?;
        }
        Commands::Ps => {
            commands::ps(&backend).await?;
        }
        Commands::Hosts => {
            commands::hosts(&backend).await?;
        }
        Commands::Top => {
            commands::top(&backend).await?;
        }
    }

    Ok(())
}
