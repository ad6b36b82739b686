// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Notification Registry
//!
//! Tracks which connections are live for which account and pushes
//! [`UpdateEvent`]s to them. The connection table is owned by a single
//! control loop; everything else talks to it through [`RegistryHandle`],
//! which only ever sends messages.
//!
//! Each inbound message type has its own queue:
//! - connect (bounded, acknowledged once the entry exists)
//! - disconnect (unbounded, so teardown never waits on the loop)
//! - evict (bounded)
//! - publish (bounded)
//! - shutdown (single slot, carries the reply channel)
//!
//! Closing a connection from the registry side means dropping its mailbox
//! sender. The connection's outbound loop sees the mailbox end and closes the
//! transport.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::wallet::{AccountId, UpdateEvent};

/// Pending events per connection before it is considered stalled.
pub const MAILBOX_CAPACITY: usize = 5;

const CONNECT_QUEUE: usize = 16;
const EVICT_QUEUE: usize = 5;
const PUBLISH_QUEUE: usize = 5;

/// How long shutdown waits for connections to close before giving up.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// How long `publish` and `evict_account` wait on a full queue.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Identifies one live connection.
pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub account_id: AccountId,
    pub connection_id: ConnectionId,
}

/// A registered connection, as seen from the connection side.
///
/// `closed` must be held until the connection task has fully finished;
/// dropping it tells a shutting-down registry that this connection is gone.
#[derive(Debug)]
pub struct Subscription {
    key: ConnectionKey,
    mailbox: mpsc::Receiver<UpdateEvent>,
    closed: oneshot::Sender<()>,
}

impl Subscription {
    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub fn into_parts(
        self,
    ) -> (
        ConnectionKey,
        mpsc::Receiver<UpdateEvent>,
        oneshot::Sender<()>,
    ) {
        (self.key, self.mailbox, self.closed)
    }
}

/// How the registry finished shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection closed within the grace period.
    Graceful,
    /// The grace period ran out with connections still open.
    Forced { remaining: usize },
}

/// Fan-out of wallet update events to live connections.
///
/// [`RegistryHandle`] is the in-process implementation.
#[async_trait]
pub trait Fanout: Send + Sync {
    /// Registers a new connection. Returns once the registry has the entry, so
    /// any publish issued afterwards reaches it.
    async fn connect(&self, account_id: AccountId) -> Result<Subscription, RegistryError>;

    /// Removes a connection. Unknown keys are ignored.
    async fn disconnect(&self, key: ConnectionKey);

    /// Closes every connection of an account.
    async fn evict_account(&self, account_id: AccountId) -> Result<(), RegistryError>;

    /// Queues an event for every connection of the event's account.
    async fn publish(&self, event: UpdateEvent) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub mailbox_capacity: usize,
    pub shutdown_grace: Duration,
    pub enqueue_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            mailbox_capacity: MAILBOX_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }
}

struct ConnectRequest {
    key: ConnectionKey,
    mailbox: mpsc::Sender<UpdateEvent>,
    closed: oneshot::Receiver<()>,
    ack: oneshot::Sender<()>,
}

struct Entry {
    mailbox: mpsc::Sender<UpdateEvent>,
    closed: oneshot::Receiver<()>,
}

/// Cloneable sender side of the registry.
#[derive(Clone)]
pub struct RegistryHandle {
    connect_tx: mpsc::Sender<ConnectRequest>,
    disconnect_tx: mpsc::UnboundedSender<ConnectionKey>,
    evict_tx: mpsc::Sender<AccountId>,
    publish_tx: mpsc::Sender<UpdateEvent>,
    shutdown_tx: mpsc::Sender<oneshot::Sender<ShutdownOutcome>>,
    mailbox_capacity: usize,
    enqueue_timeout: Duration,
}

impl RegistryHandle {
    /// Starts the control loop on the current runtime.
    pub fn spawn(config: RegistryConfig) -> RegistryHandle {
        let (connect_tx, connect_rx) = mpsc::channel(CONNECT_QUEUE);
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let (evict_tx, evict_rx) = mpsc::channel(EVICT_QUEUE);
        let (publish_tx, publish_rx) = mpsc::channel(PUBLISH_QUEUE);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let registry = Registry {
            accounts: HashMap::new(),
            closing: Vec::new(),
            connect_rx,
            disconnect_rx,
            evict_rx,
            publish_rx,
            shutdown_rx,
            shutdown_grace: config.shutdown_grace,
        };
        tokio::spawn(registry.run());

        RegistryHandle {
            connect_tx,
            disconnect_tx,
            evict_tx,
            publish_tx,
            shutdown_tx,
            mailbox_capacity: config.mailbox_capacity.max(1),
            enqueue_timeout: config.enqueue_timeout,
        }
    }

    /// Stops accepting connections, closes every live one and waits (up to
    /// the grace period) for them to finish.
    pub async fn shutdown(&self) -> Result<ShutdownOutcome, RegistryError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shutdown_tx
            .send(reply_tx)
            .await
            .map_err(|_| RegistryError::Closed)?;
        reply_rx.await.map_err(|_| RegistryError::Closed)
    }

    fn map_send_timeout<T>(e: SendTimeoutError<T>) -> RegistryError {
        match e {
            SendTimeoutError::Timeout(_) => RegistryError::Busy,
            SendTimeoutError::Closed(_) => RegistryError::Closed,
        }
    }
}

#[async_trait]
impl Fanout for RegistryHandle {
    async fn connect(&self, account_id: AccountId) -> Result<Subscription, RegistryError> {
        let key = ConnectionKey {
            account_id,
            connection_id: Uuid::new_v4(),
        };
        let (mailbox_tx, mailbox_rx) = mpsc::channel(self.mailbox_capacity);
        let (closed_tx, closed_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();

        self.connect_tx
            .send(ConnectRequest {
                key,
                mailbox: mailbox_tx,
                closed: closed_rx,
                ack: ack_tx,
            })
            .await
            .map_err(|_| RegistryError::ShuttingDown)?;
        ack_rx.await.map_err(|_| RegistryError::ShuttingDown)?;

        Ok(Subscription {
            key,
            mailbox: mailbox_rx,
            closed: closed_tx,
        })
    }

    async fn disconnect(&self, key: ConnectionKey) {
        // A closed loop has already dropped every entry.
        let _ = self.disconnect_tx.send(key);
    }

    async fn evict_account(&self, account_id: AccountId) -> Result<(), RegistryError> {
        self.evict_tx
            .send_timeout(account_id, self.enqueue_timeout)
            .await
            .map_err(Self::map_send_timeout)
    }

    async fn publish(&self, event: UpdateEvent) -> Result<(), RegistryError> {
        self.publish_tx
            .send_timeout(event, self.enqueue_timeout)
            .await
            .map_err(Self::map_send_timeout)
    }
}

/// State owned by the control loop.
struct Registry {
    accounts: HashMap<AccountId, HashMap<ConnectionId, Entry>>,
    /// Completion signals of connections removed from the table but possibly
    /// still tearing down.
    closing: Vec<oneshot::Receiver<()>>,
    connect_rx: mpsc::Receiver<ConnectRequest>,
    disconnect_rx: mpsc::UnboundedReceiver<ConnectionKey>,
    evict_rx: mpsc::Receiver<AccountId>,
    publish_rx: mpsc::Receiver<UpdateEvent>,
    shutdown_rx: mpsc::Receiver<oneshot::Sender<ShutdownOutcome>>,
    shutdown_grace: Duration,
}

impl Registry {
    async fn run(mut self) {
        debug!("Notification registry started");
        loop {
            tokio::select! {
                Some(request) = self.connect_rx.recv() => self.register(request),
                Some(key) = self.disconnect_rx.recv() => self.remove(key),
                Some(account_id) = self.evict_rx.recv() => self.evict(account_id),
                Some(event) = self.publish_rx.recv() => self.deliver(event),
                reply = self.shutdown_rx.recv() => {
                    let outcome = self.shutdown().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                    break;
                }
            }
        }
        debug!("Notification registry stopped");
    }

    fn register(&mut self, request: ConnectRequest) {
        let ConnectRequest {
            key,
            mailbox,
            closed,
            ack,
        } = request;
        self.accounts
            .entry(key.account_id)
            .or_default()
            .insert(key.connection_id, Entry { mailbox, closed });
        // The connecting side may have given up already; its entry goes away
        // again with its disconnect.
        let _ = ack.send(());
    }

    fn remove(&mut self, key: ConnectionKey) {
        let Some(connections) = self.accounts.get_mut(&key.account_id) else {
            return;
        };
        let removed = connections.remove(&key.connection_id);
        if connections.is_empty() {
            self.accounts.remove(&key.account_id);
        }
        if let Some(entry) = removed {
            self.retire(entry);
        }
    }

    fn evict(&mut self, account_id: AccountId) {
        if let Some(connections) = self.accounts.remove(&account_id) {
            info!("Evicting {} connection(s)", connections.len());
            for (_, entry) in connections {
                self.retire(entry);
            }
        }
    }

    fn deliver(&mut self, event: UpdateEvent) {
        let Some(connections) = self.accounts.get(&event.account_id) else {
            return;
        };

        let mut stalled = Vec::new();
        for (connection_id, entry) in connections {
            match entry.mailbox.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Mailbox full, dropping stalled connection");
                    stalled.push(*connection_id);
                }
                Err(TrySendError::Closed(_)) => stalled.push(*connection_id),
            }
        }

        for connection_id in stalled {
            self.remove(ConnectionKey {
                account_id: event.account_id,
                connection_id,
            });
        }
    }

    /// Closes the entry's mailbox and remembers its completion signal.
    fn retire(&mut self, entry: Entry) {
        let Entry { mailbox, closed } = entry;
        drop(mailbox);
        self.closing
            .retain_mut(|signal| matches!(signal.try_recv(), Err(TryRecvError::Empty)));
        self.closing.push(closed);
    }

    async fn shutdown(&mut self) -> ShutdownOutcome {
        info!("Notification registry shutting down");

        // Connects already queued still get registered, so they are closed
        // with everything else.
        self.connect_rx.close();
        while let Some(request) = self.connect_rx.recv().await {
            self.register(request);
        }

        let accounts: Vec<_> = self.accounts.drain().collect();
        for (_, connections) in accounts {
            for (_, entry) in connections {
                self.retire(entry);
            }
        }

        let mut pending: FuturesUnordered<_> = self.closing.drain(..).collect();
        let total = pending.len();
        let drained = timeout(self.shutdown_grace, async {
            while pending.next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => {
                info!("Closed {} connection(s)", total);
                ShutdownOutcome::Graceful
            }
            Err(_) => {
                let remaining = pending.len();
                warn!(
                    "Giving up on closing {} of {} connection(s) cleanly",
                    remaining, total
                );
                ShutdownOutcome::Forced { remaining }
            }
        }
    }
}
