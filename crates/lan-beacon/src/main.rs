// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lan-beacon CLI
//!
//! Announce an address on the local network, or find the addresses others
//! announce.
//!
//! # Usage
//!
//! ```bash
//! # Announce a hub every 5 seconds (multicast 239.0.0.1:5001)
//! lan-beacon announce http://10.0.0.5:5000/hub
//!
//! # Print every announcement received
//! lan-beacon --mode broadcast listen
//!
//! # Collect peers for 6 seconds, as JSON
//! lan-beacon find --timeout 6 --json
//! ```

use clap::{Parser, Subcommand};
use lan_beacon::{discover_hosts, DiscoveryConfig, DiscoveryMode, DiscoveryService};
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Zero-configuration LAN discovery over UDP broadcast or multicast
#[derive(Parser, Debug)]
#[command(name = "lan-beacon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Addressing mode (broadcast, multicast)
    #[arg(short, long, global = true)]
    mode: Option<DiscoveryMode>,

    /// Discovery port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Multicast group
    #[arg(short, long, global = true)]
    group: Option<Ipv4Addr>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Announce an address until interrupted
    Announce {
        /// Address to announce, e.g. http://10.0.0.5:5000/hub
        address: String,
    },

    /// Print every announcement until interrupted
    Listen,

    /// Collect distinct announced addresses for a while
    Find {
        /// Collection time in seconds
        #[arg(short, long, default_value = "6")]
        timeout: u64,

        /// Print the result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[derive(Serialize)]
struct ListenEvent<'a> {
    address: &'a str,
    source: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so stdout only carries results.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!(
        "[discovery] {} mode on port {} (group {}, interval {}ms)",
        config.mode, config.port, config.multicast_group, config.announce_interval_ms
    );

    match args.command {
        Commands::Announce { address } => announce(&config, &address).await,
        Commands::Listen => listen(&config).await,
        Commands::Find { timeout, json } => find(&config, timeout, json).await,
    }
}

/// Config file first, then command-line overrides.
fn load_config(args: &Args) -> Result<DiscoveryConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            DiscoveryConfig::from_file(path)?
        }
        None => DiscoveryConfig::default(),
    };

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(group) = args.group {
        config.multicast_group = group;
    }

    config.validate()?;
    Ok(config)
}

async fn announce(config: &DiscoveryConfig, address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let service = DiscoveryService::udp(config)?;
    service.broadcast_presence(address)?;
    if !service.is_broadcasting() {
        return Err("could not create the announce socket".into());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping...");
    service.dispose();
    Ok(())
}

async fn listen(config: &DiscoveryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let service = DiscoveryService::udp(config)?;
    let mut events = service.subscribe();
    service.start_listening()?;
    if !service.is_listening() {
        return Err(format!("could not listen on port {}", config.port).into());
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping...");
                break;
            }
            event = events.recv() => match event {
                Ok(host) => {
                    let line = serde_json::to_string(&ListenEvent {
                        address: &host.address,
                        source: host.source,
                    })?;
                    println!("{}", line);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("[discovery] {} announcements skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    service.dispose();
    Ok(())
}

async fn find(
    config: &DiscoveryConfig,
    timeout: u64,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let peers = discover_hosts(config, Duration::from_secs(timeout)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&peers)?);
    } else if peers.is_empty() {
        info!("No peers found within {}s", timeout);
    } else {
        for peer in &peers {
            println!("{}", peer);
        }
    }
    Ok(())
}
