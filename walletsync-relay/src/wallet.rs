// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wallet Domain Types
//!
//! Shared by the store, the registry and the HTTP layer. The encrypted wallet
//! and its hmac are opaque: nothing in the relay inspects them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The first version a wallet can have.
pub const INITIAL_WALLET_VERSION: u64 = 1;

/// Largest version any backend can store (SQLite integers are signed).
pub const MAX_WALLET_VERSION: u64 = i64::MAX as u64;

/// Account identifier issued by the credential collaborator.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        AccountId(id)
    }
}

/// The latest wallet an account has stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    #[serde(skip)]
    pub account_id: AccountId,
    /// Client-encrypted wallet payload.
    pub encrypted_wallet: String,
    /// Strictly increasing, gap-free, starting at 1.
    #[serde(rename = "sequence")]
    pub version: u64,
    /// Client-supplied integrity tag, returned verbatim.
    pub hmac: String,
}

/// Notification that an account's wallet moved to `version`.
///
/// Carries no wallet content; subscribers pull the record themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateEvent {
    pub account_id: AccountId,
    pub version: u64,
}

impl UpdateEvent {
    pub fn new(account_id: AccountId, version: u64) -> Self {
        UpdateEvent {
            account_id,
            version,
        }
    }

    /// Text frame pushed to subscribers.
    pub fn wire_message(&self) -> String {
        format!("wallet-update:{}", self.version)
    }
}

/// Result of a wallet submission.
///
/// `record` is the store's authoritative copy whether or not the write was
/// accepted. It is `None` only for a rejected write on an account that has
/// no wallet yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSyncResult {
    pub record: Option<WalletRecord>,
    pub accepted: bool,
}

impl WalletSyncResult {
    pub fn accepted(record: WalletRecord) -> Self {
        WalletSyncResult {
            record: Some(record),
            accepted: true,
        }
    }

    pub fn rejected(latest: Option<WalletRecord>) -> Self {
        WalletSyncResult {
            record: latest,
            accepted: false,
        }
    }
}
