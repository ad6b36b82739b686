// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Walletsync Relay
//!
//! Stores one encrypted wallet per account and lets several devices edit it
//! without a central lock. Writes are compare-and-set on a version number;
//! connected devices of the account are told about every accepted write over
//! a WebSocket (`wallet-update:<version>`).

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod storage;
pub mod sync;
pub mod wallet;

pub use error::{ApiError, AuthError, ConfigError, RegistryError, StoreError, SyncError};
pub use registry::{Fanout, RegistryHandle, ShutdownOutcome};
pub use server::RelayServer;
pub use storage::WalletStore;
pub use sync::WalletSync;
pub use wallet::{AccountId, UpdateEvent, WalletRecord, WalletSyncResult};
