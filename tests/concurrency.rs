//! Concurrency tests: send serialization on one connection and parallel
//! register traffic against shared device memory.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use plc_link::config::ServerConfig;
use plc_link::core::MemoryBank;
use plc_link::service::{ClientOptions, ControlClient, DeviceServer};
use plc_link::BankSet;
use std::sync::Arc;
use tokio::task::JoinSet;

fn banks(capacity: usize) -> BankSet {
    let mut banks = BankSet::new();
    banks.add_bank("data", MemoryBank::new(capacity));
    banks
}

/// Many tasks hammering one client: the per-connection exchange lock must
/// keep request/reply pairs intact, so every task gets exactly its own
/// payload back. Interleaved bytes would corrupt framing or cross replies.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_exchanges_never_interleave() {
    let server = DeviceServer::new(ServerConfig::default(), banks(1024)).unwrap();
    let addr = server.start(0).await.unwrap();
    let client = Arc::new(
        ControlClient::connect(addr, ClientOptions::default())
            .await
            .unwrap(),
    );

    let mut tasks = JoinSet::new();
    for worker in 0..8u8 {
        let client = Arc::clone(&client);
        tasks.spawn(async move {
            for round in 0..50u8 {
                // distinct pattern per (worker, round)
                let payload = vec![worker ^ round.wrapping_mul(31); 64 + round as usize];
                let reply = client.ping(&payload).await.unwrap();
                assert_eq!(reply, payload, "worker {worker} round {round}");
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    client.close().await;
    server.close().await;
}

/// Parallel clients writing disjoint ranges: the bank lock serializes every
/// access, so all writes land and none tear.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_clients_share_memory() {
    let server = DeviceServer::new(ServerConfig::default(), banks(4096)).unwrap();
    let addr = server.start(0).await.unwrap();

    let mut tasks = JoinSet::new();
    for worker in 0..4u16 {
        tasks.spawn(async move {
            let client = ControlClient::connect(addr, ClientOptions::default())
                .await
                .unwrap();
            let base = u32::from(worker) * 1024;
            for i in 0..16u32 {
                let fill = (worker as u8).wrapping_add(i as u8);
                client
                    .write_bytes(0, base + i * 64, &[fill; 64])
                    .await
                    .unwrap();
            }
            client.close().await;
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let verifier = ControlClient::connect(addr, ClientOptions::default())
        .await
        .unwrap();
    for worker in 0..4u16 {
        let base = u32::from(worker) * 1024;
        for i in 0..16u32 {
            let fill = (worker as u8).wrapping_add(i as u8);
            assert_eq!(
                verifier.read_bytes(0, base + i * 64, 64).await.unwrap(),
                vec![fill; 64]
            );
        }
    }

    verifier.close().await;
    server.close().await;
}

/// Typed writes from parallel tasks stay atomic per call: every observed
/// 4-byte value is exactly one of the written patterns, never a torn mix.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_typed_writes_do_not_tear() {
    let server = DeviceServer::new(ServerConfig::default(), banks(64)).unwrap();
    let addr = server.start(0).await.unwrap();

    let written: Vec<u32> = (0..4u32).map(|w| 0x0101_0101u32 * (w + 1)).collect();
    let expected = written.clone();
    let mut tasks = JoinSet::new();
    for &value in &written {
        let expected = expected.clone();
        tasks.spawn(async move {
            let client = ControlClient::connect(addr, ClientOptions::default())
                .await
                .unwrap();
            for _ in 0..50 {
                client.write_u32(0, 0, &[value]).await.unwrap();
                let read = client.read_u32(0, 0, 1).await.unwrap()[0];
                assert!(
                    expected.contains(&read),
                    "torn value observed: {read:#010x}"
                );
            }
            client.close().await;
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    server.close().await;
}
