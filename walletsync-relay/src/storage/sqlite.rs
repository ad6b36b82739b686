// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! SQLite wallet store.
//!
//! The version check lives in the SQL statement itself, so any number of
//! store handles (or processes) sharing one database file stay linearized
//! per account.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use super::{now_secs, WalletStore, WriteOutcome};
use crate::error::StoreError;
use crate::wallet::{AccountId, WalletRecord, INITIAL_WALLET_VERSION};

/// How long a writer waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed wallet storage.
pub struct SqliteWalletStore {
    conn: Mutex<Connection>,
}

impl SqliteWalletStore {
    /// Opens or creates a wallet database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::with_connection(conn)
    }

    /// Creates an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS wallets (
                account_id INTEGER PRIMARY KEY,
                encrypted_wallet TEXT NOT NULL,
                version INTEGER NOT NULL CHECK (version >= 1),
                hmac TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(SqliteWalletStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

fn to_sql_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::InvalidVersion(version))
}

impl WalletStore for SqliteWalletStore {
    fn get(&self, account_id: AccountId) -> Result<Option<WalletRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT encrypted_wallet, version, hmac FROM wallets WHERE account_id = ?1",
                params![account_id.0],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(encrypted_wallet, version, hmac)| {
            let version = u64::try_from(version)
                .map_err(|_| StoreError::Corrupt(format!("version {}", version)))?;
            Ok(WalletRecord {
                account_id,
                encrypted_wallet,
                version,
                hmac,
            })
        })
        .transpose()
    }

    fn set_first(
        &self,
        account_id: AccountId,
        encrypted_wallet: &str,
        hmac: &str,
    ) -> Result<WriteOutcome, StoreError> {
        let conn = self.conn()?;
        let rows_affected = conn.execute(
            "INSERT INTO wallets (account_id, encrypted_wallet, version, hmac, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(account_id) DO NOTHING",
            params![
                account_id.0,
                encrypted_wallet,
                to_sql_version(INITIAL_WALLET_VERSION)?,
                hmac,
                now_secs(),
            ],
        )?;

        Ok(if rows_affected == 1 {
            WriteOutcome::Accepted
        } else {
            WriteOutcome::Conflict
        })
    }

    fn advance(
        &self,
        account_id: AccountId,
        encrypted_wallet: &str,
        hmac: &str,
        expected_prior_version: u64,
    ) -> Result<WriteOutcome, StoreError> {
        let next_version = expected_prior_version
            .checked_add(1)
            .ok_or(StoreError::InvalidVersion(expected_prior_version))?;

        let conn = self.conn()?;
        let rows_affected = conn.execute(
            "UPDATE wallets SET encrypted_wallet = ?1, version = ?2, hmac = ?3, updated_at = ?4
             WHERE account_id = ?5 AND version = ?6",
            params![
                encrypted_wallet,
                to_sql_version(next_version)?,
                hmac,
                now_secs(),
                account_id.0,
                to_sql_version(expected_prior_version)?,
            ],
        )?;

        Ok(if rows_affected == 1 {
            WriteOutcome::Accepted
        } else {
            WriteOutcome::Conflict
        })
    }

    fn wallet_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM wallets", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
