// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wallet Sync Endpoint
//!
//! Ties the store to the notification fan-out. A write either wins the
//! compare-and-set or returns the authoritative record; in both cases the
//! caller gets the store's copy back. Notifying other devices is best effort
//! and never fails a write that already committed.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SyncError;
use crate::metrics::RelayMetrics;
use crate::registry::Fanout;
use crate::storage::WalletStore;
use crate::wallet::{AccountId, UpdateEvent, WalletRecord, WalletSyncResult};

/// Store plus fan-out, shared by every request handler.
#[derive(Clone)]
pub struct WalletSync {
    store: Arc<dyn WalletStore>,
    fanout: Arc<dyn Fanout>,
    metrics: RelayMetrics,
}

impl WalletSync {
    pub fn new(store: Arc<dyn WalletStore>, fanout: Arc<dyn Fanout>, metrics: RelayMetrics) -> Self {
        WalletSync {
            store,
            fanout,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn WalletStore> {
        &self.store
    }

    pub fn fanout(&self) -> &Arc<dyn Fanout> {
        &self.fanout
    }

    /// Attempts to store `proposed_version` of the account's wallet.
    pub async fn submit_wallet(
        &self,
        account_id: AccountId,
        encrypted_wallet: &str,
        hmac: &str,
        proposed_version: u64,
    ) -> Result<WalletSyncResult, SyncError> {
        let result = self
            .store
            .set_wallet(account_id, encrypted_wallet, hmac, proposed_version)?;
        self.metrics.record_wallet_write(result.accepted);

        if result.accepted {
            let event = UpdateEvent::new(account_id, proposed_version);
            if let Err(e) = self.fanout.publish(event).await {
                warn!("Could not queue wallet update notification: {}", e);
                self.metrics.notifications_dropped.inc();
            }
        } else {
            debug!("Wallet write rejected, version {} is stale", proposed_version);
        }

        Ok(result)
    }

    /// Returns the account's latest wallet, if any.
    pub async fn fetch_wallet(&self, account_id: AccountId) -> Result<Option<WalletRecord>, SyncError> {
        Ok(self.store.get(account_id)?)
    }
}
