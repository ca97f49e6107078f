use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kvpool::cli::commands;
use kvpool::config;

#[derive(Parser)]
#[command(name = "kvpool")]
#[command(version, about = "Primary/replica connection routing for key/value clusters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (falls back to KVPOOL_* environment variables)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configured nodes and their effective connection options
    Nodes,

    /// Borrow connections through the router and report which node served each
    Check {
        /// Number of write acquisitions
        #[arg(long, default_value = "4")]
        writes: usize,

        /// Number of read acquisitions
        #[arg(long, default_value = "4")]
        reads: usize,

        /// Send reads to primaries
        #[arg(long)]
        read_from_primary: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Sequential acquisitions only; the topology watch is the one background task
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Nodes => {
            commands::cmd_nodes(&config)?;
        }
        Commands::Check {
            writes,
            reads,
            read_from_primary,
        } => {
            commands::cmd_check(&config, writes, reads, read_from_primary).await?;
        }
    }

    Ok(())
}
