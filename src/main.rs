//! Transmit Server
//!
//! Runs the SSE broadcasting core behind its HTTP routes:
//! - `serve` - Start the server
//! - `config` - Print or write the default configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transmit::api::{self, AppState};
use transmit::bus::{BusTransport, MemoryBus};
use transmit::config::{generate_default_config, BusDriver, Config, LoggingConfig, PingInterval};
use transmit::Transmit;

#[derive(Parser)]
#[command(name = "transmit-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Server-Sent Events broadcasting server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Ping interval: milliseconds, a duration such as "30s", or "false"
        #[arg(long)]
        ping_interval: Option<PingInterval>,
        /// Bus driver (none, memory)
        #[arg(long)]
        bus: Option<BusDriver>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write config to {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
            Ok(())
        }
        Commands::Serve {
            host,
            port,
            ping_interval,
            bus,
        } => {
            let mut config = match &cli.config {
                Some(path) => Config::load_with_env(path)?,
                None => Config::load_default(),
            };

            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(ping_interval) = ping_interval {
                config.transmit.ping_interval = ping_interval;
            }
            if let Some(bus) = bus {
                config.transmit.transport.driver = bus;
            }

            init_tracing(&config.logging);
            serve(config).await
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("transmit={},tower_http=info", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Transmit server v{}", env!("CARGO_PKG_VERSION"));

    let bus: Option<Arc<dyn BusTransport>> = match config.transmit.transport.driver {
        BusDriver::None => None,
        BusDriver::Memory => Some(Arc::new(MemoryBus::new())),
    };

    match config.transmit.ping_interval.period() {
        Some(period) => tracing::info!("Ping interval: {:?}", period),
        None => tracing::info!("Ping disabled"),
    }

    let transmit = Arc::new(
        Transmit::new(&config.transmit, bus)
            .await
            .context("Failed to start broadcast coordinator")?,
    );

    api::serve(AppState::new(transmit, config.server)).await?;
    Ok(())
}
