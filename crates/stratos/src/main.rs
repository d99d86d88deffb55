//! Stratos broker.
//!
//! A Kafka-wire-compatible message broker core: segmented log, topic/
//! partition manager, a single-process replication state machine, a
//! consumer-group coordinator, and the protocol dispatcher that ties them
//! to the wire.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

mod config;
mod server;

use server::Broker;

#[derive(Parser)]
#[command(name = "stratos")]
#[command(author, version, about = "Stratos -- a Kafka-wire-compatible broker core", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker
    Server {
        /// Configuration file path (TOML or YAML)
        #[arg(short, long, default_value = "/etc/stratos/stratos.toml")]
        config: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stratos=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            info!("starting stratos broker");

            let config = config::load(&config).await?;
            let broker = Broker::new(config).await?;

            let shutdown = async {
                tokio::signal::ctrl_c().await.ok();
                info!("shutdown signal received");
            };

            tokio::select! {
                result = broker.run() => result?,
                () = shutdown => {
                    broker.shutdown().await?;
                }
            }
        }

        Commands::Version => {
            println!("stratos {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
