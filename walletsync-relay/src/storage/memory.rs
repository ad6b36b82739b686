// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory wallet store.
//!
//! Does not survive restarts. Each compare-and-set runs under one write lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{WalletStore, WriteOutcome};
use crate::error::StoreError;
use crate::wallet::{AccountId, WalletRecord, INITIAL_WALLET_VERSION};

/// Wallets keyed by account.
pub struct MemoryWalletStore {
    wallets: RwLock<HashMap<AccountId, WalletRecord>>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        MemoryWalletStore {
            wallets: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryWalletStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Lock(e.to_string())
}

impl WalletStore for MemoryWalletStore {
    fn get(&self, account_id: AccountId) -> Result<Option<WalletRecord>, StoreError> {
        let wallets = self.wallets.read().map_err(poisoned)?;
        Ok(wallets.get(&account_id).cloned())
    }

    fn set_first(
        &self,
        account_id: AccountId,
        encrypted_wallet: &str,
        hmac: &str,
    ) -> Result<WriteOutcome, StoreError> {
        let mut wallets = self.wallets.write().map_err(poisoned)?;
        match wallets.entry(account_id) {
            Entry::Occupied(_) => Ok(WriteOutcome::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(WalletRecord {
                    account_id,
                    encrypted_wallet: encrypted_wallet.to_string(),
                    version: INITIAL_WALLET_VERSION,
                    hmac: hmac.to_string(),
                });
                Ok(WriteOutcome::Accepted)
            }
        }
    }

    fn advance(
        &self,
        account_id: AccountId,
        encrypted_wallet: &str,
        hmac: &str,
        expected_prior_version: u64,
    ) -> Result<WriteOutcome, StoreError> {
        let mut wallets = self.wallets.write().map_err(poisoned)?;
        match wallets.get_mut(&account_id) {
            Some(record) if record.version == expected_prior_version => {
                record.encrypted_wallet = encrypted_wallet.to_string();
                record.hmac = hmac.to_string();
                record.version = expected_prior_version + 1;
                Ok(WriteOutcome::Accepted)
            }
            _ => Ok(WriteOutcome::Conflict),
        }
    }

    fn wallet_count(&self) -> Result<usize, StoreError> {
        Ok(self.wallets.read().map_err(poisoned)?.len())
    }
}
