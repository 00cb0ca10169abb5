// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tetherd - standalone tether relay.
//!
//! Accepts tether clients, keeps the offline queue under the user state
//! directory, and optionally echoes every application packet back to its
//! sender.
//!
//! Usage:
//!   tetherd [--config <toml>] [--bind <host>] [--port <n>] [--echo]

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tether_server::{Server, ServerConfig, ServerEvent};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tetherd", version, about = "Duplex TCP/TLS message relay")]
struct Args {
    /// TOML config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (0 picks a free one)
    #[arg(long, short)]
    port: Option<u16>,

    /// Directory of the offline queue snapshot
    #[arg(long)]
    queue_dir: Option<PathBuf>,

    /// Access token clients must present
    #[arg(long)]
    token: Option<String>,

    /// Reply to every application packet with its own data
    #[arg(long)]
    echo: bool,

    /// Log at debug level
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn server_config(&self) -> tether_core::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.host = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(dir) = &self.queue_dir {
            config.queue_dir = Some(dir.clone());
        } else if config.queue_dir.is_none() {
            config.queue_dir = default_queue_dir();
        }
        Ok(config)
    }
}

fn default_queue_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/state")))
        .map(|dir| dir.join("tether"))
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    let config = match args.server_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let (server, mut events) = Server::new(config);
    let addr = match server.start().await {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("failed to start: {}", e);
            std::process::exit(1);
        }
    };

    // Signal readiness to a parent process
    println!("READY {addr}");
    let _ = std::io::stdout().flush();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(event) => handle_event(event, args.echo),
                None => break,
            },
        }
    }

    server.stop().await;
}

fn handle_event(event: ServerEvent, echo: bool) {
    match event {
        ServerEvent::Message(inbound) if echo && inbound.control_message().is_none() => {
            if let Err(e) = inbound.reply(inbound.data().clone()) {
                tracing::debug!("echo to {} failed: {}", inbound.connection.id(), e);
            }
        }
        ServerEvent::Warning(e) => tracing::debug!("warning: {}", e),
        _ => {}
    }
}
