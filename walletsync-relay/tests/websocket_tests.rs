// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end tests against a running relay: HTTP writes, WebSocket
//! notifications and shutdown.

mod common;

use std::time::Duration;

use common::{http_request, TestRelay, ACCOUNT, FULL_TOKEN, READ_TOKEN};
use futures_util::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use walletsync_relay::{Fanout, ShutdownOutcome};

fn wallet_json(wallet: &str, sequence: u64) -> String {
    serde_json::json!({
        "token": FULL_TOKEN,
        "encryptedWallet": wallet,
        "sequence": sequence,
        "hmac": format!("hmac-{}", sequence),
    })
    .to_string()
}

#[tokio::test]
async fn test_http_write_notifies_connected_device() {
    let relay = TestRelay::start().await;
    let (mut phone, _) = connect_async(relay.ws_url(FULL_TOKEN)).await.unwrap();
    relay.wait_for_connections(1).await;

    let (status, body) = http_request(
        relay.http_addr,
        "POST",
        "/api/3/wallet",
        Some(&wallet_json("w1", 1)),
    )
    .await;
    assert_eq!(status, 200, "{}", body);

    let frame = timeout(Duration::from_secs(5), phone.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame, Message::Text("wallet-update:1".into()));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_every_device_of_account_is_notified() {
    let relay = TestRelay::start().await;
    let (mut laptop, _) = connect_async(relay.ws_url(FULL_TOKEN)).await.unwrap();
    let (mut desktop, _) = connect_async(relay.ws_url(FULL_TOKEN)).await.unwrap();
    relay.wait_for_connections(2).await;

    let result = relay.sync.submit_wallet(ACCOUNT, "w1", "h1", 1).await.unwrap();
    assert!(result.accepted);

    for device in [&mut laptop, &mut desktop] {
        let frame = timeout(Duration::from_secs(5), device.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Text("wallet-update:1".into()));
    }

    relay.shutdown().await;
}

#[tokio::test]
async fn test_rejected_write_sends_nothing() {
    let relay = TestRelay::start().await;
    let (mut phone, _) = connect_async(relay.ws_url(FULL_TOKEN)).await.unwrap();
    relay.wait_for_connections(1).await;

    relay.sync.submit_wallet(ACCOUNT, "w1", "h1", 1).await.unwrap();
    let stale = relay.sync.submit_wallet(ACCOUNT, "w2", "h2", 1).await.unwrap();
    assert!(!stale.accepted);
    relay.sync.submit_wallet(ACCOUNT, "w2", "h2", 2).await.unwrap();

    let first = phone.next().await.unwrap().unwrap();
    let second = phone.next().await.unwrap().unwrap();
    assert_eq!(first, Message::Text("wallet-update:1".into()));
    assert_eq!(second, Message::Text("wallet-update:2".into()));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_upgrade_rejected_without_valid_token() {
    let relay = TestRelay::start().await;

    match connect_async(relay.ws_url("bogus")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("expected 401, got {:?}", other.map(|_| ())),
    }
    match connect_async(relay.ws_url(READ_TOKEN)).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 403),
        other => panic!("expected 403, got {:?}", other.map(|_| ())),
    }
    for _ in 0..200 {
        if relay.metrics.connection_errors.get() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(relay.metrics.connection_errors.get(), 2);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_evicted_device_is_closed() {
    let relay = TestRelay::start().await;
    let (mut phone, _) = connect_async(relay.ws_url(FULL_TOKEN)).await.unwrap();
    relay.wait_for_connections(1).await;

    relay.sync.fanout().evict_account(ACCOUNT).await.unwrap();

    let frame = timeout(Duration::from_secs(5), phone.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(frame, Message::Close(_)));
    relay.wait_for_connections(0).await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_live_connections() {
    let relay = TestRelay::start().await;
    let mut readers = Vec::new();
    for _ in 0..3 {
        let (mut device, _) = connect_async(relay.ws_url(FULL_TOKEN)).await.unwrap();
        readers.push(tokio::spawn(async move {
            let mut saw_close = false;
            while let Some(Ok(frame)) = device.next().await {
                if matches!(frame, Message::Close(_)) {
                    saw_close = true;
                }
            }
            saw_close
        }));
    }
    relay.wait_for_connections(3).await;

    assert_eq!(relay.shutdown().await, ShutdownOutcome::Graceful);
    for reader in readers {
        assert!(timeout(Duration::from_secs(5), reader).await.unwrap().unwrap());
    }
}

#[tokio::test]
async fn test_http_endpoints_on_both_listeners() {
    let relay = TestRelay::start().await;

    let (status, body) = http_request(relay.http_addr, "GET", "/health", None).await;
    assert_eq!(status, 200);
    assert!(body.contains("healthy"));

    // Plain health checks on the socket port are answered too.
    let (status, body) = http_request(relay.ws_addr, "GET", "/health", None).await;
    assert_eq!(status, 200);
    assert!(body.contains("healthy"));

    let (status, body) = http_request(
        relay.http_addr,
        "GET",
        &format!("/api/3/wallet?token={}", READ_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, 404);
    assert!(body.contains("No wallet"));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_silent_peer_is_closed_before_upgrade() {
    let relay = TestRelay::start().await;
    let mut silent = TcpStream::connect(relay.ws_addr).await.unwrap();

    // The relay hangs up once the handshake deadline passes.
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(5), silent.read_to_end(&mut buf))
        .await
        .expect("relay kept the silent connection open");
    assert_eq!(read.unwrap(), 0);
    assert_eq!(relay.metrics.connection_errors.get(), 1);

    relay.shutdown().await;
}
