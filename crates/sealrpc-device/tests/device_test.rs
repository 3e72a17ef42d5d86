// Integration tests for sealrpc-device
//
// These tests start a real queue device, attach fake workers to its backend
// and talk to it through the encrypted client stream.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use sealrpc_common::auth::{AllowList, KeyPair};
use sealrpc_common::transport::{AsyncSecureStream, BackendEndpoint, MsgPackCodec};
use sealrpc_common::{FaultKind, Response, SealRpcError};
use sealrpc_device::{DeviceHandle, QueueDevice, RetryConfig};
use tokio::task::JoinHandle;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

// ============================================================================
// Test Helpers
// ============================================================================

struct TestKeys {
    server: KeyPair,
    client: KeyPair,
}

fn test_keys() -> TestKeys {
    TestKeys {
        server: KeyPair::generate().unwrap(),
        client: KeyPair::generate().unwrap(),
    }
}

async fn start_device(keys: &TestKeys) -> DeviceHandle {
    QueueDevice::new(keys.server.clone(), AllowList::from_keys([keys.client.public]))
        .with_retry_config(RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            backoff_multiplier: 2.0,
        })
        .start("127.0.0.1:0")
        .await
        .unwrap()
}

/// Fake worker: answers every request with `<tag>:<payload>`.
async fn spawn_worker(endpoint: &BackendEndpoint, tag: &'static str) -> JoinHandle<()> {
    let mut socket = DealerSocket::new();
    socket.connect(&endpoint.address()).await.unwrap();

    tokio::spawn(async move {
        while let Ok(message) = socket.recv().await {
            let mut frames = message.into_vecdeque();
            let payload = frames.pop_back().unwrap();
            let mut reply = tag.as_bytes().to_vec();
            reply.push(b':');
            reply.extend_from_slice(&payload);
            frames.push_back(Bytes::from(reply));

            let frames: VecDeque<Bytes> = frames;
            if socket.send(ZmqMessage::try_from(frames).unwrap()).await.is_err() {
                break;
            }
        }
    })
}

async fn connect(device: &DeviceHandle, keys: &TestKeys) -> AsyncSecureStream {
    AsyncSecureStream::connect(&device.local_addr().to_string(), &keys.client, &keys.server.public)
        .await
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_relay_round_trip() {
    let keys = test_keys();
    let device = start_device(&keys).await;
    let worker = spawn_worker(device.endpoint(), "w1").await;

    let mut client = connect(&device, &keys).await;
    let reply = client.round_trip(b"hello", Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply, b"w1:hello");

    worker.abort();
    device.shutdown().await;
}

#[tokio::test]
async fn test_requests_spread_across_workers() {
    let keys = test_keys();
    let device = start_device(&keys).await;
    let first = spawn_worker(device.endpoint(), "w1").await;
    let second = spawn_worker(device.endpoint(), "w2").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut client = connect(&device, &keys).await;
    let mut served_by = HashSet::new();
    for i in 0..6 {
        let reply = client
            .round_trip(format!("req{}", i).as_bytes(), Duration::from_secs(2))
            .await
            .unwrap();
        let reply = String::from_utf8(reply).unwrap();
        assert!(reply.ends_with(&format!("req{}", i)));
        served_by.insert(reply[..2].to_string());
    }
    assert_eq!(served_by.len(), 2, "both workers should receive requests");

    first.abort();
    second.abort();
    device.shutdown().await;
}

#[tokio::test]
async fn test_replies_return_to_their_connection() {
    let keys = test_keys();
    let device = start_device(&keys).await;
    let worker = spawn_worker(device.endpoint(), "w").await;

    let mut a = connect(&device, &keys).await;
    let mut b = connect(&device, &keys).await;
    let (ra, rb) = tokio::join!(
        a.round_trip(b"from-a", Duration::from_secs(2)),
        b.round_trip(b"from-b", Duration::from_secs(2)),
    );
    assert_eq!(ra.unwrap(), b"w:from-a");
    assert_eq!(rb.unwrap(), b"w:from-b");
    assert_eq!(device.connection_count(), 2);

    worker.abort();
    device.shutdown().await;
}

#[tokio::test]
async fn test_unauthorized_client_rejected() {
    let keys = test_keys();
    let device = start_device(&keys).await;
    let stranger = KeyPair::generate().unwrap();

    let result = AsyncSecureStream::connect(
        &device.local_addr().to_string(),
        &stranger,
        &keys.server.public,
    )
    .await;
    assert!(matches!(result, Err(SealRpcError::Handshake(_))));
    assert_eq!(device.connection_count(), 0);

    device.shutdown().await;
}

#[tokio::test]
async fn test_request_without_workers_times_out() {
    let keys = test_keys();
    let device = start_device(&keys).await;

    let mut client = connect(&device, &keys).await;
    let result = client.round_trip(b"lost", Duration::from_millis(500)).await;
    assert!(matches!(result, Err(SealRpcError::Timeout(500))));

    device.shutdown().await;
}

#[tokio::test]
async fn test_stop_accepting_refuses_new_requests() {
    let keys = test_keys();
    let mut device = start_device(&keys).await;
    let mut worker = DealerSocket::new();
    worker.connect(&device.endpoint().address()).await.unwrap();

    let mut in_flight = connect(&device, &keys).await;
    let mut idle = connect(&device, &keys).await;
    let pending = tokio::spawn(async move { in_flight.round_trip(b"before", Duration::from_secs(2)).await });

    // The worker holds the first request while the device stops.
    let request = worker.recv().await.unwrap();
    device.stop_accepting().await;

    let late = AsyncSecureStream::connect(
        &device.local_addr().to_string(),
        &keys.client,
        &keys.server.public,
    )
    .await;
    assert!(late.is_err());

    let started = std::time::Instant::now();
    let reply = idle.round_trip(b"after", Duration::from_secs(2)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    match MsgPackCodec::decode_response(&reply).unwrap() {
        Response::Fault { kind, message } => {
            assert_eq!(kind, FaultKind::Unavailable);
            assert!(message.contains("shutting down"));
        }
        other => panic!("expected a fault, got {:?}", other),
    }

    let mut frames = request.into_vecdeque();
    frames.pop_back();
    frames.push_back(Bytes::from_static(b"ok:before"));
    worker.send(ZmqMessage::try_from(frames).unwrap()).await.unwrap();
    assert_eq!(pending.await.unwrap().unwrap(), b"ok:before");

    device.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_removes_ipc_file() {
    let keys = test_keys();
    let device = start_device(&keys).await;
    let path = device.endpoint().ipc_path().map(|p| p.to_path_buf());

    device.shutdown().await;

    if let Some(path) = path {
        assert!(!path.exists());
    }
}
