// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common Test Utilities
//!
//! Starts a relay on ephemeral ports and talks plain HTTP to it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use walletsync_relay::auth::{AuthScope, Authenticator, MemoryAuthenticator};
use walletsync_relay::config::RelayConfig;
use walletsync_relay::metrics::RelayMetrics;
use walletsync_relay::storage::{MemoryWalletStore, StorageBackend, WalletStore};
use walletsync_relay::{AccountId, RegistryError, RelayServer, ShutdownOutcome, WalletSync};

pub const ACCOUNT: AccountId = AccountId(42);
pub const FULL_TOKEN: &str = "device-full";
pub const READ_TOKEN: &str = "device-read";

pub struct TestRelay {
    pub ws_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub sync: WalletSync,
    pub metrics: RelayMetrics,
    pub auth: Arc<MemoryAuthenticator>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<ShutdownOutcome, RegistryError>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        Self::start_with(Arc::new(MemoryWalletStore::new())).await
    }

    pub async fn start_with(store: Arc<dyn WalletStore>) -> Self {
        let config = RelayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            http_addr: "127.0.0.1:0".parse().unwrap(),
            storage_backend: StorageBackend::Memory,
            shutdown_grace_secs: 2,
            write_wait_secs: 1,
            ..RelayConfig::default()
        };

        let auth = Arc::new(MemoryAuthenticator::new());
        auth.issue(FULL_TOKEN, ACCOUNT, "laptop", AuthScope::Full);
        auth.issue(READ_TOKEN, ACCOUNT, "watch", AuthScope::GetWallet);

        let metrics = RelayMetrics::new().unwrap();
        let authenticator: Arc<dyn Authenticator> = auth.clone();
        let server = RelayServer::bind(&config, store, authenticator, metrics.clone())
            .await
            .unwrap();
        let ws_addr = server.ws_addr().unwrap();
        let http_addr = server.http_addr().unwrap();
        let sync = server.sync();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));

        TestRelay {
            ws_addr,
            http_addr,
            sync,
            metrics,
            auth,
            stop: Some(stop_tx),
            task,
        }
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/3/websocket?token={}", self.ws_addr, token)
    }

    /// Waits until the registry has `n` live connections.
    pub async fn wait_for_connections(&self, n: i64) {
        for _ in 0..200 {
            if self.metrics.connections_active.get() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} live connections, have {}",
            n,
            self.metrics.connections_active.get()
        );
    }

    pub async fn shutdown(mut self) -> ShutdownOutcome {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("relay did not stop")
            .unwrap()
            .unwrap()
    }
}

/// Minimal HTTP/1.1 client: returns the status code and the body.
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = body.unwrap_or("");
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        addr,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8_lossy(&raw).to_string();

    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}
