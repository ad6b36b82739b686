// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Configuration
//!
//! Read from `WALLETSYNC_*` environment variables. Unset variables take their
//! default; set-but-invalid ones are an error.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::handler::ConnectionConfig;
use crate::registry::{RegistryConfig, MAILBOX_CAPACITY};
use crate::storage::StorageBackend;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// WebSocket listener.
    pub listen_addr: SocketAddr,
    /// Wallet API, health and metrics listener.
    pub http_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub storage_backend: StorageBackend,
    /// Bearer token guarding `/metrics`. `None` leaves it open.
    pub metrics_token: Option<String>,
    pub max_body_bytes: usize,
    pub shutdown_grace_secs: u64,
    pub notify_timeout_ms: u64,
    pub pong_wait_secs: u64,
    pub write_wait_secs: u64,
    pub read_limit_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8091)),
            data_dir: PathBuf::from("./data"),
            storage_backend: StorageBackend::Sqlite,
            metrics_token: None,
            max_body_bytes: 100_000,
            shutdown_grace_secs: 10,
            notify_timeout_ms: 100,
            pong_wait_secs: 60,
            write_wait_secs: 10,
            read_limit_bytes: 512,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RelayConfig::default();
        let config = RelayConfig {
            listen_addr: parse_or(&lookup, "WALLETSYNC_LISTEN_ADDR", defaults.listen_addr)?,
            http_addr: parse_or(&lookup, "WALLETSYNC_HTTP_ADDR", defaults.http_addr)?,
            data_dir: lookup("WALLETSYNC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            storage_backend: parse_or(&lookup, "WALLETSYNC_STORAGE", defaults.storage_backend)?,
            metrics_token: lookup("WALLETSYNC_METRICS_TOKEN").filter(|t| !t.is_empty()),
            max_body_bytes: parse_or(&lookup, "WALLETSYNC_MAX_BODY_BYTES", defaults.max_body_bytes)?,
            shutdown_grace_secs: parse_or(
                &lookup,
                "WALLETSYNC_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace_secs,
            )?,
            notify_timeout_ms: parse_or(
                &lookup,
                "WALLETSYNC_NOTIFY_TIMEOUT_MS",
                defaults.notify_timeout_ms,
            )?,
            pong_wait_secs: parse_or(&lookup, "WALLETSYNC_PONG_WAIT_SECS", defaults.pong_wait_secs)?,
            write_wait_secs: parse_or(
                &lookup,
                "WALLETSYNC_WRITE_WAIT_SECS",
                defaults.write_wait_secs,
            )?,
            read_limit_bytes: parse_or(
                &lookup,
                "WALLETSYNC_READ_LIMIT_BYTES",
                defaults.read_limit_bytes,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("WALLETSYNC_PONG_WAIT_SECS", self.pong_wait_secs),
            ("WALLETSYNC_WRITE_WAIT_SECS", self.write_wait_secs),
            ("WALLETSYNC_MAX_BODY_BYTES", self.max_body_bytes as u64),
            ("WALLETSYNC_READ_LIMIT_BYTES", self.read_limit_bytes as u64),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            mailbox_capacity: MAILBOX_CAPACITY,
            shutdown_grace: self.shutdown_grace(),
            enqueue_timeout: Duration::from_millis(self.notify_timeout_ms),
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let pong_wait = Duration::from_secs(self.pong_wait_secs);
        ConnectionConfig {
            pong_wait,
            write_wait: Duration::from_secs(self.write_wait_secs),
            ping_interval: pong_wait * 9 / 10,
            read_limit: self.read_limit_bytes,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}
