// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Prometheus Metrics
//!
//! Counters and gauges exposed on `/metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Relay metrics. Cloning shares the underlying collectors.
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    /// HTTP requests by method and endpoint.
    pub requests_total: IntCounterVec,
    /// Error responses by kind.
    pub errors_total: IntCounterVec,
    /// Wallet submissions by outcome (`accepted`, `conflict`).
    pub wallet_writes_total: IntCounterVec,
    pub connections_total: IntCounter,
    pub connections_active: IntGauge,
    pub connection_errors: IntCounter,
    /// Update events that could not be handed to the registry.
    pub notifications_dropped: IntCounter,
    pub wallets_stored: IntGauge,
}

impl RelayMetrics {
    /// Creates the collectors and registers them with a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("walletsync_requests_total", "HTTP requests handled"),
            &["method", "endpoint"],
        )?;
        let errors_total = IntCounterVec::new(
            Opts::new("walletsync_errors_total", "Error responses by type"),
            &["error_type"],
        )?;
        let wallet_writes_total = IntCounterVec::new(
            Opts::new("walletsync_wallet_writes_total", "Wallet writes by outcome"),
            &["outcome"],
        )?;
        let connections_total = IntCounter::new(
            "walletsync_connections_total",
            "WebSocket connections accepted",
        )?;
        let connections_active = IntGauge::new(
            "walletsync_connections_active",
            "WebSocket connections currently open",
        )?;
        let connection_errors = IntCounter::new(
            "walletsync_connection_errors_total",
            "Failed or rejected WebSocket upgrades",
        )?;
        let notifications_dropped = IntCounter::new(
            "walletsync_notifications_dropped_total",
            "Update events not delivered to the registry",
        )?;
        let wallets_stored =
            IntGauge::new("walletsync_wallets_stored", "Accounts with a stored wallet")?;

        let collectors: [Box<dyn prometheus::core::Collector>; 8] = [
            Box::new(requests_total.clone()),
            Box::new(errors_total.clone()),
            Box::new(wallet_writes_total.clone()),
            Box::new(connections_total.clone()),
            Box::new(connections_active.clone()),
            Box::new(connection_errors.clone()),
            Box::new(notifications_dropped.clone()),
            Box::new(wallets_stored.clone()),
        ];
        for collector in collectors {
            registry.register(collector)?;
        }

        Ok(RelayMetrics {
            registry,
            requests_total,
            errors_total,
            wallet_writes_total,
            connections_total,
            connections_active,
            connection_errors,
            notifications_dropped,
            wallets_stored,
        })
    }

    /// Renders every metric in the Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn record_request(&self, method: &str, endpoint: &str) {
        self.requests_total
            .with_label_values(&[method, endpoint])
            .inc();
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total.with_label_values(&[error_type]).inc();
    }

    pub fn record_wallet_write(&self, accepted: bool) {
        let outcome = if accepted { "accepted" } else { "conflict" };
        self.wallet_writes_total.with_label_values(&[outcome]).inc();
    }
}
