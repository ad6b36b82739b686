// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Runs one registered connection. Two loops share the socket:
//! - inbound: only watches for liveness and disconnection
//! - outbound: drains the mailbox into `wallet-update:<version>` frames and
//!   sends keepalive pings
//!
//! Whichever loop stops first trips a shared teardown latch and the other
//! follows.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::registry::{Fanout, Subscription};
use crate::wallet::UpdateEvent;

/// Per-connection deadlines and limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Longest silence tolerated from the peer.
    pub pong_wait: Duration,
    /// Deadline for a single outbound frame.
    pub write_wait: Duration,
    /// Interval between server pings. Must be shorter than `pong_wait`.
    pub ping_interval: Duration,
    /// Largest inbound frame accepted, in bytes.
    pub read_limit: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        ConnectionConfig {
            pong_wait,
            write_wait: Duration::from_secs(10),
            ping_interval: pong_wait * 9 / 10,
            read_limit: 512,
        }
    }
}

impl ConnectionConfig {
    /// Protocol settings that make tungstenite refuse oversized frames while
    /// reading them, before the message is buffered.
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.read_limit);
        config.max_frame_size = Some(self.read_limit);
        config
    }
}

/// One-shot latch. Triggering it again does nothing.
struct Teardown(watch::Sender<bool>);

impl Teardown {
    fn new() -> Self {
        Teardown(watch::Sender::new(false))
    }

    fn trigger(&self) {
        self.0.send_replace(true);
    }

    async fn triggered(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Serves a connection until either side closes it, then deregisters it.
///
/// The subscription's completion signal is released only after everything
/// else is done, so a registry shutdown waits for the socket to be closed.
pub async fn handle_connection<S>(
    ws_stream: WebSocketStream<S>,
    subscription: Subscription,
    fanout: Arc<dyn Fanout>,
    config: ConnectionConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Random label for log lines; account ids and tokens stay out of logs.
    let session = &uuid::Uuid::new_v4().to_string()[..8];
    let (key, mailbox, closed) = subscription.into_parts();
    let (write, read) = ws_stream.split();
    let teardown = Teardown::new();

    debug!("[{}] Connection open", session);
    tokio::join!(
        inbound(read, &teardown, config, session),
        outbound(write, mailbox, &teardown, config, session),
    );

    fanout.disconnect(key).await;
    debug!("[{}] Connection closed", session);
    drop(closed);
}

async fn inbound<S>(
    mut read: SplitStream<WebSocketStream<S>>,
    teardown: &Teardown,
    config: ConnectionConfig,
    session: &str,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = teardown.triggered() => break,
            frame = timeout(config.pong_wait, read.next()) => frame,
        };

        match frame {
            Err(_) => {
                debug!("[{}] Read deadline expired", session);
                break;
            }
            Ok(None) => {
                debug!("[{}] Disconnected", session);
                break;
            }
            Ok(Some(Err(e))) => {
                debug!("[{}] Read error: {}", session, e);
                break;
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                debug!("[{}] Client sent close", session);
                break;
            }
            Ok(Some(Ok(msg))) => {
                if msg.len() > config.read_limit {
                    warn!(
                        "[{}] Frame of {} bytes exceeds read limit",
                        session,
                        msg.len()
                    );
                    break;
                }
                // Anything else just proves the peer is alive.
            }
        }
    }
    teardown.trigger();
}

async fn outbound<S>(
    mut write: SplitSink<WebSocketStream<S>, Message>,
    mut mailbox: mpsc::Receiver<UpdateEvent>,
    teardown: &Teardown,
    config: ConnectionConfig,
    session: &str,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);

    loop {
        tokio::select! {
            _ = teardown.triggered() => break,
            event = mailbox.recv() => {
                let Some(event) = event else {
                    debug!("[{}] Closed by registry", session);
                    break;
                };
                let frame = Message::Text(event.wire_message());
                if let Err(e) = send_frame(&mut write, frame, config.write_wait).await {
                    debug!("[{}] Write failed: {}", session, e);
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = send_frame(&mut write, Message::Ping(Vec::new()), config.write_wait).await {
                    debug!("[{}] Ping failed: {}", session, e);
                    break;
                }
            }
        }
    }

    teardown.trigger();
    // Sends the close frame if one has not gone out yet.
    let _ = timeout(config.write_wait, write.close()).await;
}

async fn send_frame<S>(
    write: &mut SplitSink<WebSocketStream<S>, Message>,
    frame: Message,
    deadline: Duration,
) -> Result<(), tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(deadline, write.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(tungstenite::Error::Io(std::io::ErrorKind::TimedOut.into())),
    }
}
