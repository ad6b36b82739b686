// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Server
//!
//! Wires the listeners to the sync endpoint and the registry, and sequences
//! shutdown: stop the HTTP server and stop accepting sockets first, then let
//! the registry close what is still connected.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthScope, Authenticator, MemoryAuthenticator, SqliteAuthenticator, AUTH_DB_FILE};
use crate::config::RelayConfig;
use crate::error::{AuthError, ErrorBody, RegistryError, StoreError};
use crate::handler::{handle_connection, ConnectionConfig};
use crate::http::{create_router, HttpState, PATH_WEBSOCKET};
use crate::metrics::RelayMetrics;
use crate::registry::{Fanout, RegistryHandle, ShutdownOutcome};
use crate::storage::{create_wallet_store, StorageBackend, WalletStore};
use crate::sync::WalletSync;
use crate::wallet::AccountId;

/// Opens the wallet store and the token table the configuration points at.
pub fn open_backends(
    config: &RelayConfig,
) -> Result<(Arc<dyn WalletStore>, Arc<dyn Authenticator>), StoreError> {
    let store: Arc<dyn WalletStore> =
        Arc::from(create_wallet_store(config.storage_backend, &config.data_dir)?);
    let auth: Arc<dyn Authenticator> = match config.storage_backend {
        StorageBackend::Memory => {
            warn!("In-memory token table is empty; no client can authenticate");
            Arc::new(MemoryAuthenticator::new())
        }
        StorageBackend::Sqlite => {
            Arc::new(SqliteAuthenticator::open(config.data_dir.join(AUTH_DB_FILE))?)
        }
    };
    Ok((store, auth))
}

/// Everything a WebSocket connection task needs.
#[derive(Clone)]
struct ConnectionContext {
    auth: Arc<dyn Authenticator>,
    registry: RegistryHandle,
    metrics: RelayMetrics,
    connection: ConnectionConfig,
    start_time: Instant,
}

/// Bound but not yet running relay.
pub struct RelayServer {
    ws_listener: TcpListener,
    http_listener: TcpListener,
    http_state: HttpState,
    context: ConnectionContext,
}

impl RelayServer {
    /// Binds both listeners and starts the notification registry.
    pub async fn bind(
        config: &RelayConfig,
        store: Arc<dyn WalletStore>,
        auth: Arc<dyn Authenticator>,
        metrics: RelayMetrics,
    ) -> io::Result<Self> {
        let ws_listener = TcpListener::bind(config.listen_addr).await?;
        let http_listener = TcpListener::bind(config.http_addr).await?;

        let registry = RegistryHandle::spawn(config.registry_config());
        let fanout: Arc<dyn Fanout> = Arc::new(registry.clone());
        let start_time = Instant::now();

        let http_state = HttpState {
            sync: WalletSync::new(store, fanout, metrics.clone()),
            auth: auth.clone(),
            metrics: metrics.clone(),
            start_time,
            metrics_token: config.metrics_token.clone(),
            max_body_bytes: config.max_body_bytes,
        };
        let context = ConnectionContext {
            auth,
            registry,
            metrics,
            connection: config.connection_config(),
            start_time,
        };

        Ok(RelayServer {
            ws_listener,
            http_listener,
            http_state,
            context,
        })
    }

    pub fn ws_addr(&self) -> io::Result<SocketAddr> {
        self.ws_listener.local_addr()
    }

    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http_listener.local_addr()
    }

    /// The sync endpoint the HTTP layer uses, for callers embedding the relay.
    pub fn sync(&self) -> WalletSync {
        self.http_state.sync.clone()
    }

    /// Serves until `shutdown` resolves, then closes every live connection.
    pub async fn run<F>(self, shutdown: F) -> Result<ShutdownOutcome, RegistryError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let RelayServer {
            ws_listener,
            http_listener,
            http_state,
            context,
        } = self;

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });

        let router = create_router(http_state);
        let mut http_stop = stop_rx.clone();
        let http_task = tokio::spawn(async move {
            let result = axum::serve(http_listener, router)
                .with_graceful_shutdown(async move {
                    let _ = http_stop.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        });

        let mut ws_stop = stop_rx;
        loop {
            tokio::select! {
                _ = ws_stop.wait_for(|stop| *stop) => break,
                accepted = ws_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted TCP connection from {}", addr);
                        tokio::spawn(serve_connection(stream, context.clone()));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
            }
        }

        info!("Shutting down");
        drop(ws_listener);
        if let Err(e) = http_task.await {
            error!("HTTP server task failed: {}", e);
        }

        let outcome = context.registry.shutdown().await?;
        info!("Shutdown complete: {:?}", outcome);
        Ok(outcome)
    }
}

async fn serve_connection(stream: TcpStream, context: ConnectionContext) {
    // The peer gets one write deadline to say what it wants.
    let handshake_deadline = context.connection.write_wait;
    match timeout(
        handshake_deadline,
        answer_plain_health_check(&stream, context.start_time),
    )
    .await
    {
        Ok(true) => return,
        Ok(false) => {}
        Err(_) => {
            debug!("Peer sent nothing before the handshake deadline");
            context.metrics.connection_errors.inc();
            return;
        }
    }

    let mut account_id: Option<AccountId> = None;
    let auth = context.auth.clone();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let resolved = authorize_upgrade(auth.as_ref(), request)?;
        account_id = Some(resolved);
        Ok(response)
    };

    let ws_config = context.connection.websocket_config();
    let upgrade = accept_hdr_async_with_config(stream, callback, Some(ws_config));
    let ws_stream = match timeout(handshake_deadline, upgrade).await {
        Ok(Ok(ws_stream)) => ws_stream,
        Ok(Err(e)) => {
            debug!("WebSocket upgrade failed: {}", e);
            context.metrics.connection_errors.inc();
            return;
        }
        Err(_) => {
            debug!("WebSocket upgrade timed out");
            context.metrics.connection_errors.inc();
            return;
        }
    };
    let Some(account_id) = account_id else {
        return;
    };

    context.metrics.connections_total.inc();
    let subscription = match context.registry.connect(account_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            debug!("Registration refused: {}", e);
            let mut ws_stream = ws_stream;
            let _ = ws_stream.close(None).await;
            return;
        }
    };

    context.metrics.connections_active.inc();
    let fanout: Arc<dyn Fanout> = Arc::new(context.registry.clone());
    handle_connection(ws_stream, subscription, fanout, context.connection).await;
    context.metrics.connections_active.dec();
}

/// Checks path and token during the upgrade handshake.
fn authorize_upgrade(
    auth: &dyn Authenticator,
    request: &Request,
) -> Result<AccountId, ErrorResponse> {
    if request.uri().path() != PATH_WEBSOCKET {
        return Err(reject(StatusCode::NOT_FOUND, "Unknown Endpoint"));
    }

    let token = request
        .uri()
        .query()
        .and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|token| !token.is_empty())
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "Missing token parameter"))?;

    auth.resolve(&token, AuthScope::Full).map_err(|e| match e {
        AuthError::Unauthorized => reject(StatusCode::UNAUTHORIZED, &e.to_string()),
        AuthError::Forbidden => reject(StatusCode::FORBIDDEN, &e.to_string()),
        AuthError::Store(inner) => {
            error!("Error getting Token: {}", inner);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "")
        }
    })
}

fn reject(status: StatusCode, detail: &str) -> ErrorResponse {
    let body = serde_json::to_string(&ErrorBody::new(status, detail)).ok();
    let mut response = ErrorResponse::new(body);
    *response.status_mut() = status;
    response
}

/// Load balancers health-check the socket port with a plain `GET /health`. Answers
/// it and returns true if that is what arrived.
async fn answer_plain_health_check(stream: &TcpStream, start_time: Instant) -> bool {
    let mut peek_buf = [0u8; 64];
    let n = match stream.peek(&mut peek_buf).await {
        Ok(n) if n > 0 => n,
        _ => return false,
    };
    let head = String::from_utf8_lossy(&peek_buf[..n]);
    if !head.starts_with("GET /health") || head.contains("Upgrade:") {
        return false;
    }

    let body = serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": start_time.elapsed().as_secs(),
    })
    .to_string();
    // Consume the request so closing the socket does not reset the peer.
    let mut request = [0u8; 1024];
    let _ = stream.try_read(&mut request);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.try_write(response.as_bytes());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::AccountId;

    fn upgrade_request(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).unwrap()
    }

    fn authenticator() -> MemoryAuthenticator {
        let auth = MemoryAuthenticator::new();
        auth.issue("full", AccountId(8), "phone", AuthScope::Full);
        auth.issue("read", AccountId(8), "watch", AuthScope::GetWallet);
        auth
    }

    #[test]
    fn test_upgrade_with_full_token() {
        let auth = authenticator();
        let account = authorize_upgrade(&auth, &upgrade_request("/api/3/websocket?token=full"));
        assert_eq!(account.unwrap(), AccountId(8));
    }

    #[test]
    fn test_upgrade_rejections() {
        let auth = authenticator();

        let cases = [
            ("/api/3/websocket", StatusCode::BAD_REQUEST),
            ("/api/3/websocket?token=", StatusCode::BAD_REQUEST),
            ("/api/3/websocket?token=nope", StatusCode::UNAUTHORIZED),
            ("/api/3/websocket?token=read", StatusCode::FORBIDDEN),
            ("/api/2/websocket?token=full", StatusCode::NOT_FOUND),
        ];
        for (uri, expected) in cases {
            let err = authorize_upgrade(&auth, &upgrade_request(uri)).unwrap_err();
            assert_eq!(err.status(), expected, "{}", uri);
        }
    }

    #[test]
    fn test_reject_body_is_json_error() {
        let response = reject(StatusCode::UNAUTHORIZED, "Token Not Found");
        assert_eq!(
            response.body().as_deref(),
            Some(r#"{"error":"Unauthorized: Token Not Found"}"#)
        );
    }

    #[test]
    fn test_open_memory_backends() {
        let config = RelayConfig {
            storage_backend: StorageBackend::Memory,
            ..RelayConfig::default()
        };
        let (store, _auth) = open_backends(&config).unwrap();
        assert_eq!(store.wallet_count().unwrap(), 0);
    }

    #[test]
    fn test_open_sqlite_backends_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig {
            storage_backend: StorageBackend::Sqlite,
            data_dir: dir.path().join("relay"),
            ..RelayConfig::default()
        };
        open_backends(&config).unwrap();
        assert!(config.data_dir.join(AUTH_DB_FILE).exists());
        assert!(config.data_dir.join("wallets.db").exists());
    }
}
