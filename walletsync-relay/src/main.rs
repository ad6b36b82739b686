// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Walletsync Relay Server
//!
//! Provides:
//! - Wallet API (`/api/3/wallet`) with versioned compare-and-set writes
//! - WebSocket endpoint (`/api/3/websocket`) pushing wallet update notices
//! - HTTP endpoints for health checks and Prometheus metrics

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use walletsync_relay::config::RelayConfig;
use walletsync_relay::metrics::RelayMetrics;
use walletsync_relay::server::{open_backends, RelayServer};
use walletsync_relay::storage::StorageBackend;
use walletsync_relay::ShutdownOutcome;

#[derive(Parser)]
#[command(name = "walletsync-relay")]
#[command(version, about = "Wallet sync relay server")]
struct Cli {
    /// WebSocket listen address (overrides WALLETSYNC_LISTEN_ADDR)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// HTTP listen address for the wallet API, health and metrics
    #[arg(long)]
    http: Option<SocketAddr>,

    /// Data directory for the SQLite databases
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Storage backend: sqlite or memory
    #[arg(long)]
    storage: Option<StorageBackend>,
}

impl Cli {
    fn apply(self, config: &mut RelayConfig) {
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(http) = self.http {
            config.http_addr = http;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(storage) = self.storage {
            config.storage_backend = storage;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("walletsync_relay=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = RelayConfig::from_env().context("Invalid configuration")?;
    cli.apply(&mut config);

    info!(
        "Starting Walletsync Relay Server v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("WebSocket: {}", config.listen_addr);
    info!("HTTP (wallet/health/metrics): {}", config.http_addr);
    info!("Storage backend: {:?}", config.storage_backend);

    let metrics = RelayMetrics::new().context("Failed to create metrics")?;
    let (store, auth) = open_backends(&config).context("Failed to open storage")?;
    if let Ok(count) = store.wallet_count() {
        metrics.wallets_stored.set(count as i64);
    }

    let server = RelayServer::bind(&config, store, auth, metrics)
        .await
        .context("Failed to bind listeners")?;

    let outcome = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    match outcome {
        ShutdownOutcome::Graceful => Ok(ExitCode::SUCCESS),
        ShutdownOutcome::Forced { remaining } => {
            warn!("Forced exit with {} connection(s) still open", remaining);
            Ok(ExitCode::FAILURE)
        }
    }
}
