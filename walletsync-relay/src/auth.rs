// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Credential Resolution
//!
//! Turns an opaque request token into the account it was issued for, checking
//! that the token's scope covers what the request needs. Token issuance lives
//! elsewhere; this module only reads.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{AuthError, StoreError};
use crate::storage::now_secs;
use crate::wallet::AccountId;

/// File name of the token database inside the data directory.
pub const AUTH_DB_FILE: &str = "auth.db";

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScope {
    /// Everything, including wallet writes and live notifications.
    Full,
    /// Reading the wallet only.
    GetWallet,
}

impl AuthScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScope::Full => "*",
            AuthScope::GetWallet => "get-wallet-state",
        }
    }

    /// Whether a token holding `self` may perform a request needing `required`.
    pub fn permits(&self, required: AuthScope) -> bool {
        *self == AuthScope::Full || *self == required
    }
}

impl FromStr for AuthScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*" => Ok(AuthScope::Full),
            "get-wallet-state" => Ok(AuthScope::GetWallet),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}

/// Resolves request tokens to accounts.
pub trait Authenticator: Send + Sync {
    fn resolve(&self, token: &str, required: AuthScope) -> Result<AccountId, AuthError>;
}

/// A stored token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub account_id: AccountId,
    pub device_id: String,
    pub scope: AuthScope,
    /// Unix seconds. `None` never expires.
    pub expires_at: Option<i64>,
}

impl TokenGrant {
    fn check(&self, required: AuthScope, now: i64) -> Result<AccountId, AuthError> {
        if self.expires_at.is_some_and(|t| t <= now) {
            return Err(AuthError::Unauthorized);
        }
        if !self.scope.permits(required) {
            return Err(AuthError::Forbidden);
        }
        Ok(self.account_id)
    }
}

/// In-process token table for tests and development.
#[derive(Default)]
pub struct MemoryAuthenticator {
    tokens: RwLock<HashMap<String, TokenGrant>>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` as a grant for `account_id`.
    pub fn issue(&self, token: &str, account_id: AccountId, device_id: &str, scope: AuthScope) {
        self.insert(
            token,
            TokenGrant {
                account_id,
                device_id: device_id.to_string(),
                scope,
                expires_at: None,
            },
        );
    }

    pub fn insert(&self, token: &str, grant: TokenGrant) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.to_string(), grant);
        }
    }
}

impl Authenticator for MemoryAuthenticator {
    fn resolve(&self, token: &str, required: AuthScope) -> Result<AccountId, AuthError> {
        let tokens = self
            .tokens
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        tokens
            .get(token)
            .ok_or(AuthError::Unauthorized)?
            .check(required, now_secs())
    }
}

/// Token table in SQLite, shared with whatever issues the tokens.
pub struct SqliteAuthenticator {
    conn: Mutex<Connection>,
}

impl SqliteAuthenticator {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS auth_tokens (
                token TEXT PRIMARY KEY,
                account_id INTEGER NOT NULL,
                device_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                expires_at INTEGER
            );",
        )?;
        Ok(SqliteAuthenticator {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts or replaces a token row.
    pub fn store_token(&self, token: &str, grant: &TokenGrant) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO auth_tokens (token, account_id, device_id, scope, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                token,
                grant.account_id.0,
                grant.device_id,
                grant.scope.as_str(),
                grant.expires_at,
            ],
        )?;
        Ok(())
    }

    fn lookup(&self, token: &str) -> Result<Option<TokenGrant>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        let row = conn
            .query_row(
                "SELECT account_id, device_id, scope, expires_at FROM auth_tokens WHERE token = ?1",
                params![token],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(account_id, device_id, scope, expires_at)| {
            let scope = scope.parse::<AuthScope>().map_err(StoreError::Corrupt)?;
            Ok(TokenGrant {
                account_id: AccountId(account_id),
                device_id,
                scope,
                expires_at,
            })
        })
        .transpose()
    }
}

impl Authenticator for SqliteAuthenticator {
    fn resolve(&self, token: &str, required: AuthScope) -> Result<AccountId, AuthError> {
        self.lookup(token)?
            .ok_or(AuthError::Unauthorized)?
            .check(required, now_secs())
    }
}
