//! portmux, a reverse TCP tunnel
//!
//! Run `portmux remote <config>` on the host behind the firewall and
//! `portmux local <config>` on the publicly-reachable host. The local
//! side exposes one port per configured service and carries all of
//! them over a single tunnel per remote.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portmux_local::{LocalConfig, LocalServer};
use portmux_remote::{RemoteConfig, RemoteServer};

#[derive(Parser, Debug)]
#[command(name = "portmux")]
#[command(about = "Expose services behind a firewall through a reverse tunnel", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the local side: listen for app clients and tunnel them out
    Local {
        /// Path to the local-side YAML config
        config: PathBuf,
    },
    /// Run the remote side: accept tunnels and dial the backends
    Remote {
        /// Path to the remote-side YAML config
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Local { config } => {
            let config = LocalConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let handle = LocalServer::new(config)
                .start()
                .await
                .context("starting local server")?;

            tokio::signal::ctrl_c().await?;
            info!("interrupted, shutting down");
            handle.shutdown().await;
        }
        Commands::Remote { config } => {
            let config = RemoteConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let server = RemoteServer::bind(&config.bind)
                .await
                .context("binding tunnel acceptor")?;

            tokio::select! {
                result = server.serve() => result.context("serving tunnels")?,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, shutting down");
                }
            }
        }
    }

    Ok(())
}
