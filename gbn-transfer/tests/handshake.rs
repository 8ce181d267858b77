//! Integration tests for the REQUEST / REPLY exchange and its failure modes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gbn_transfer::{
    config::{ReceiverConfig, SenderConfig, MAX_BLOCK_SIZE},
    connection::{self, ConnError},
    packet::{Packet, PacketKind},
    receiver, sender,
    socket::Socket,
};

const TEST_DEADLINE: Duration = Duration::from_secs(10);

async fn ephemeral() -> Socket {
    let addr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

fn scratch_root(files: &[(&str, &[u8])]) -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "gbn-handshake-test-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    for (name, contents) in files {
        std::fs::write(dir.join(name), contents).unwrap();
    }
    dir
}

// ---------------------------------------------------------------------------
// Test 1: missing file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_file_is_reported_to_both_peers() {
    let root = scratch_root(&[]);
    let tx_sock = Arc::new(ephemeral().await);
    let server_addr = tx_sock.local_addr;
    let local = root.join("never-written.bin");

    let server = tokio::spawn({
        let tx_sock = Arc::clone(&tx_sock);
        async move {
            let request = connection::await_request(&tx_sock).await?;
            let config = SenderConfig {
                root,
                ..SenderConfig::default()
            };
            sender::serve_request(tx_sock, request, &config).await
        }
    });
    let target = local.clone();
    let client = tokio::spawn(async move {
        receiver::fetch_to_file(
            ephemeral().await,
            server_addr,
            "missing.txt",
            &target,
            &ReceiverConfig::default(),
        )
        .await
    });

    let (sr, cr) = tokio::time::timeout(TEST_DEADLINE, async { tokio::join!(server, client) })
        .await
        .expect("handshake stalled");

    match sr.unwrap() {
        Err(ConnError::FileNotFound(name)) => assert_eq!(name, "missing.txt"),
        other => panic!("sender: expected FileNotFound, got {other:?}"),
    }
    match cr.unwrap() {
        Err(ConnError::RemoteFileNotFound(name)) => assert_eq!(name, "missing.txt"),
        other => panic!("receiver: expected RemoteFileNotFound, got {other:?}"),
    }

    let stats = tx_sock.stats();
    assert_eq!(stats.sent.get(PacketKind::Data), 0);
    assert_eq!(stats.sent.get(PacketKind::Reply), 1);
    assert_eq!(stats.sent.total(), 1, "only the REPLY goes out");
    assert!(!local.exists(), "no local file for a failed request");
}

// ---------------------------------------------------------------------------
// Test 2: names escaping the root are treated as missing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_parent_directory_names_are_not_served() {
    let root = scratch_root(&[("inside.txt", b"ok")]);
    let server_sock = ephemeral().await;
    let server_addr = server_sock.local_addr;

    let config = SenderConfig {
        root: root.join("sub"),
        ..SenderConfig::default()
    };
    let server = tokio::spawn(async move { sender::serve(server_sock, &config).await });

    let client = ephemeral().await;
    let result = connection::request_file(
        &client,
        server_addr,
        "../inside.txt",
        &ReceiverConfig::default(),
    )
    .await;

    assert!(matches!(result, Err(ConnError::RemoteFileNotFound(_))));
    let served = tokio::time::timeout(TEST_DEADLINE, server).await.unwrap().unwrap();
    assert!(matches!(served, Err(ConnError::FileNotFound(_))));
}

// ---------------------------------------------------------------------------
// Test 3: unusable block size
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_oversized_block_request_is_rejected() {
    let root = scratch_root(&[("f.txt", b"data")]);
    let server_sock = ephemeral().await;
    let server_addr = server_sock.local_addr;

    let config = SenderConfig {
        root,
        ..SenderConfig::default()
    };
    let server = tokio::spawn(async move { sender::serve(server_sock, &config).await });

    let client = ephemeral().await;
    let receiver_cfg = ReceiverConfig {
        block_size: MAX_BLOCK_SIZE + 1,
        ..ReceiverConfig::default()
    };
    let result = connection::request_file(&client, server_addr, "f.txt", &receiver_cfg).await;

    assert!(matches!(result, Err(ConnError::Rejected(_))));
    let served = tokio::time::timeout(TEST_DEADLINE, server).await.unwrap().unwrap();
    assert!(matches!(served, Err(ConnError::InvalidRequest(_))));
}

// ---------------------------------------------------------------------------
// Test 4: sender configured with an empty window
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_sender_config_fails_before_reply() {
    let root = scratch_root(&[("h.txt", b"some bytes")]);
    let tx_sock = Arc::new(ephemeral().await);
    let server_addr = tx_sock.local_addr;

    let server = tokio::spawn({
        let tx_sock = Arc::clone(&tx_sock);
        async move {
            let request = connection::await_request(&tx_sock).await?;
            let config = SenderConfig {
                window_size: 0,
                root,
                ..SenderConfig::default()
            };
            sender::serve_request(tx_sock, request, &config).await
        }
    });

    let client = ephemeral().await;
    let request = Packet::Request {
        file_name: "h.txt".into(),
        block_size: 64,
    };
    client.send_to(&request, server_addr).await.unwrap();

    let served = tokio::time::timeout(TEST_DEADLINE, server)
        .await
        .expect("sender stalled")
        .expect("sender task panicked");
    assert!(matches!(served, Err(ConnError::InvalidConfig(_))));
    assert_eq!(tx_sock.stats().sent.total(), 0, "no REPLY for a broken sender");
}

// ---------------------------------------------------------------------------
// Test 5: no sender at all
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_silent_sender_fails_handshake() {
    // Bound but never read: requests vanish into its buffer.
    let silent = ephemeral().await;
    let client = ephemeral().await;

    let config = ReceiverConfig {
        handshake_timeout: Duration::from_millis(20),
        handshake_retries: 3,
        ..ReceiverConfig::default()
    };
    let result = tokio::time::timeout(
        TEST_DEADLINE,
        connection::request_file(&client, silent.local_addr, "x", &config),
    )
    .await
    .expect("handshake should give up on its own");

    assert!(matches!(result, Err(ConnError::HandshakeFailed(3))));
    assert_eq!(client.stats().sent.get(PacketKind::Request), 3);
}

// ---------------------------------------------------------------------------
// Test 6: late sender answers a retried request
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_late_sender_still_serves_retried_request() {
    let contents = b"late but complete".repeat(50);
    let root = scratch_root(&[("late.txt", &contents)]);
    let server_sock = ephemeral().await;
    let server_addr = server_sock.local_addr;

    let config = SenderConfig {
        root,
        timeout: Duration::from_millis(200),
        ..SenderConfig::default()
    };
    let server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        sender::serve(server_sock, &config).await
    });

    let receiver_cfg = ReceiverConfig {
        block_size: 128,
        handshake_timeout: Duration::from_millis(50),
        ..ReceiverConfig::default()
    };
    let mut out = Vec::new();
    let report = tokio::time::timeout(
        TEST_DEADLINE,
        receiver::fetch(ephemeral().await, server_addr, "late.txt", &mut out, &receiver_cfg),
    )
    .await
    .expect("transfer stalled")
    .expect("receiver");

    assert_eq!(out, contents);
    assert_eq!(report.bytes, contents.len() as u64);
    let served = server.await.unwrap().expect("sender");
    assert_eq!(served.bytes, contents.len() as u64);
}

// ---------------------------------------------------------------------------
// Test 7: garbage datagrams are dropped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_datagrams_are_ignored() {
    let contents = b"0123456789".repeat(30);
    let root = scratch_root(&[("g.txt", &contents)]);
    let tx_sock = Arc::new(ephemeral().await);
    let server_addr = tx_sock.local_addr;

    let noise = ephemeral().await;
    noise.send_raw(b"\x03garbage", server_addr).await.unwrap();
    noise.send_raw(&[], server_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let server = tokio::spawn({
        let tx_sock = Arc::clone(&tx_sock);
        async move {
            let request = connection::await_request(&tx_sock).await?;
            let config = SenderConfig {
                root,
                timeout: Duration::from_millis(200),
                ..SenderConfig::default()
            };
            sender::serve_request(tx_sock, request, &config).await
        }
    });

    let receiver_cfg = ReceiverConfig {
        block_size: 64,
        ..ReceiverConfig::default()
    };
    let mut out = Vec::new();
    tokio::time::timeout(
        TEST_DEADLINE,
        receiver::fetch(ephemeral().await, server_addr, "g.txt", &mut out, &receiver_cfg),
    )
    .await
    .expect("transfer stalled")
    .expect("receiver");

    assert_eq!(out, contents);
    server.await.unwrap().expect("sender");
    assert_eq!(tx_sock.stats().malformed, 2);
}
