// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wallet sync against a real SQLite file: the two-device scenario and
//! concurrent writers.

use std::sync::Arc;

use walletsync_relay::metrics::RelayMetrics;
use walletsync_relay::registry::{Fanout, RegistryConfig, RegistryHandle};
use walletsync_relay::storage::{SqliteWalletStore, WalletStore, WALLET_DB_FILE};
use walletsync_relay::{AccountId, WalletSync};

fn sqlite_sync(dir: &tempfile::TempDir) -> (WalletSync, RegistryHandle) {
    let store = SqliteWalletStore::open(dir.path().join(WALLET_DB_FILE)).unwrap();
    let registry = RegistryHandle::spawn(RegistryConfig::default());
    let sync = WalletSync::new(
        Arc::new(store),
        Arc::new(registry.clone()),
        RelayMetrics::new().unwrap(),
    );
    (sync, registry)
}

#[tokio::test]
async fn test_two_devices_reconcile_through_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let (sync, registry) = sqlite_sync(&dir);
    let account = AccountId(1);
    let (_, mut watcher, _closed) = registry.connect(account).await.unwrap().into_parts();

    // Device 1 creates the wallet.
    let d1 = sync.submit_wallet(account, "w1", "h1", 1).await.unwrap();
    assert!(d1.accepted);
    assert_eq!(d1.record.as_ref().unwrap().version, 1);

    // Device 2 also thinks it is first and loses.
    let d2 = sync.submit_wallet(account, "w2", "h2", 1).await.unwrap();
    assert!(!d2.accepted);
    let latest = d2.record.unwrap();
    assert_eq!(
        (latest.encrypted_wallet.as_str(), latest.version, latest.hmac.as_str()),
        ("w1", 1, "h1")
    );

    // Device 2 merges and resubmits on top of what it was given.
    let d2 = sync
        .submit_wallet(account, "w2", "h2", latest.version + 1)
        .await
        .unwrap();
    assert!(d2.accepted);

    let fetched = sync.fetch_wallet(account).await.unwrap().unwrap();
    assert_eq!(fetched.encrypted_wallet, "w2");
    assert_eq!(fetched.version, 2);
    assert_eq!(fetched.hmac, "h2");

    assert_eq!(watcher.recv().await.unwrap().version, 1);
    assert_eq!(watcher.recv().await.unwrap().version, 2);
    assert!(watcher.try_recv().is_err());
}

#[tokio::test]
async fn test_later_version_on_empty_account_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (sync, _registry) = sqlite_sync(&dir);

    let result = sync.submit_wallet(AccountId(3), "w5", "h5", 5).await.unwrap();
    assert!(!result.accepted);
    assert!(result.record.is_none());
    assert!(sync.fetch_wallet(AccountId(3)).await.unwrap().is_none());
    assert_eq!(sync.store().wallet_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_same_prior_version() {
    let dir = tempfile::tempdir().unwrap();
    let (sync, _registry) = sqlite_sync(&dir);
    let account = AccountId(9);
    sync.submit_wallet(account, "w1", "h1", 1).await.unwrap();

    let mut tasks = Vec::new();
    for device in 0..8 {
        let sync = sync.clone();
        tasks.push(tokio::spawn(async move {
            sync.submit_wallet(account, &format!("w2-{}", device), "h2", 2)
                .await
                .unwrap()
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    let winners: Vec<_> = results.iter().filter(|r| r.accepted).collect();
    assert_eq!(winners.len(), 1);
    let winning_wallet = &winners[0].record.as_ref().unwrap().encrypted_wallet;
    for loser in results.iter().filter(|r| !r.accepted) {
        let latest = loser.record.as_ref().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(&latest.encrypted_wallet, winning_wallet);
    }
}

/// Devices repeatedly read-modify-write; every accepted write moves the
/// version by exactly one.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_versions_stay_gap_free_under_contention() {
    let dir = tempfile::tempdir().unwrap();
    let (sync, _registry) = sqlite_sync(&dir);
    let account = AccountId(11);

    let mut tasks = Vec::new();
    for device in 0..4 {
        let sync = sync.clone();
        tasks.push(tokio::spawn(async move {
            let mut accepted = Vec::new();
            for _ in 0..10 {
                let current = sync
                    .fetch_wallet(account)
                    .await
                    .unwrap()
                    .map(|r| r.version)
                    .unwrap_or(0);
                let proposed = current + 1;
                let result = sync
                    .submit_wallet(account, &format!("d{}-v{}", device, proposed), "h", proposed)
                    .await
                    .unwrap();
                if result.accepted {
                    accepted.push(proposed);
                } else {
                    // Whatever the store hands back is at least as new.
                    assert!(result.record.unwrap().version >= current);
                }
            }
            accepted
        }));
    }

    let mut all_accepted = Vec::new();
    for task in tasks {
        all_accepted.extend(task.await.unwrap());
    }
    all_accepted.sort_unstable();

    let expected: Vec<u64> = (1..=all_accepted.len() as u64).collect();
    assert_eq!(all_accepted, expected);
    let stored = sync.fetch_wallet(account).await.unwrap().unwrap();
    assert_eq!(stored.version, all_accepted.len() as u64);
}

#[tokio::test]
async fn test_reopened_store_keeps_latest_version() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (sync, _registry) = sqlite_sync(&dir);
        for version in 1..=3 {
            sync.submit_wallet(AccountId(2), &format!("w{}", version), "h", version)
                .await
                .unwrap();
        }
    }

    let (sync, _registry) = sqlite_sync(&dir);
    let stored = sync.fetch_wallet(AccountId(2)).await.unwrap().unwrap();
    assert_eq!(stored.version, 3);
    let next = sync.submit_wallet(AccountId(2), "w4", "h", 4).await.unwrap();
    assert!(next.accepted);
}
