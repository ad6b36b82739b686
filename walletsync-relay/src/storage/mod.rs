// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wallet Storage
//!
//! Durable mapping from account to its latest wallet and version. Writes are
//! compare-and-set: a write is accepted only when it proposes exactly the next
//! version. Each backend expresses that check as one atomic operation, so
//! concurrent writers for the same account need no locking in the relay.

mod memory;
mod sqlite;

pub use memory::MemoryWalletStore;
pub use sqlite::SqliteWalletStore;

use std::path::Path;
use std::str::FromStr;

use crate::error::StoreError;
use crate::wallet::{
    AccountId, WalletRecord, WalletSyncResult, INITIAL_WALLET_VERSION, MAX_WALLET_VERSION,
};

/// File name of the SQLite database inside the data directory.
pub const WALLET_DB_FILE: &str = "wallets.db";

/// Outcome of a single conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// The stored version did not match the precondition. Re-read, never retry.
    Conflict,
}

/// Storage for versioned wallets.
pub trait WalletStore: Send + Sync {
    /// Returns the account's wallet, or `None` if it never stored one.
    fn get(&self, account_id: AccountId) -> Result<Option<WalletRecord>, StoreError>;

    /// Creates version 1. Conflicts if the account already has a wallet.
    fn set_first(
        &self,
        account_id: AccountId,
        encrypted_wallet: &str,
        hmac: &str,
    ) -> Result<WriteOutcome, StoreError>;

    /// Replaces the wallet with version `expected_prior_version + 1`, but only
    /// if the stored version is `expected_prior_version`. Never creates a row.
    fn advance(
        &self,
        account_id: AccountId,
        encrypted_wallet: &str,
        hmac: &str,
        expected_prior_version: u64,
    ) -> Result<WriteOutcome, StoreError>;

    /// Number of accounts with a stored wallet.
    fn wallet_count(&self) -> Result<usize, StoreError>;

    /// Stores `proposed_version` if it is the next version for the account.
    ///
    /// Versions outside `1..=MAX_WALLET_VERSION` are invalid input.
    ///
    /// A conflict is an expected outcome, not an error: the result then
    /// carries the authoritative record (if any) with `accepted = false`.
    fn set_wallet(
        &self,
        account_id: AccountId,
        encrypted_wallet: &str,
        hmac: &str,
        proposed_version: u64,
    ) -> Result<WalletSyncResult, StoreError> {
        if proposed_version > MAX_WALLET_VERSION {
            return Err(StoreError::InvalidVersion(proposed_version));
        }
        let outcome = match proposed_version {
            0 => return Err(StoreError::InvalidVersion(proposed_version)),
            INITIAL_WALLET_VERSION => self.set_first(account_id, encrypted_wallet, hmac)?,
            next => self.advance(account_id, encrypted_wallet, hmac, next - 1)?,
        };

        match outcome {
            WriteOutcome::Accepted => Ok(WalletSyncResult::accepted(WalletRecord {
                account_id,
                encrypted_wallet: encrypted_wallet.to_string(),
                version: proposed_version,
                hmac: hmac.to_string(),
            })),
            WriteOutcome::Conflict => Ok(WalletSyncResult::rejected(self.get(account_id)?)),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Creates a wallet store for the given backend.
///
/// The SQLite backend keeps its database in `data_dir` (created if missing).
pub fn create_wallet_store(
    backend: StorageBackend,
    data_dir: &Path,
) -> Result<Box<dyn WalletStore>, StoreError> {
    match backend {
        StorageBackend::Memory => Ok(Box::new(MemoryWalletStore::new())),
        StorageBackend::Sqlite => {
            std::fs::create_dir_all(data_dir)?;
            let store = SqliteWalletStore::open(data_dir.join(WALLET_DB_FILE))?;
            Ok(Box::new(store))
        }
    }
}

/// Current Unix time in seconds.
pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
