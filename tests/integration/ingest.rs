//! Data channel ingestion against a live websocket peer.

use crate::*;

use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use waypoint_services::{ChunkIngestWorker, IngestSummary};

const CHUNK_A: &str = "22222222-2222-2222-2222-222222222222";
const CHUNK_B: &str = "33333333-3333-3333-3333-333333333333";

fn spawn_worker(
    peer: &MockPeer,
    store: &ChunkStore,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<anyhow::Result<IngestSummary>> {
    let worker = ChunkIngestWorker::new(session_id(), peer.url.clone(), store.clone());
    tokio::spawn(worker.run(cancel))
}

#[tokio::test]
async fn test_chunk_is_decoded_and_committed() {
    let (_dir, store) = temp_store();
    let peer = MockPeer::start("/session/s-1").await.unwrap();

    peer.send_text(r#"{"chunkId":"22222222-2222-2222-2222-222222222222","dataBase64":"SGVsbG8="}"#);
    peer.close();

    let summary = within(spawn_worker(&peer, &store, CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.stored, 1);
    assert_eq!(read_chunk(&store, CHUNK_A).as_deref(), Some(&b"Hello"[..]));
    assert!(store
        .chunk_path(&chunk_id(CHUNK_A))
        .ends_with("22222222222222222222222222222222.chunk"));
}

#[tokio::test]
async fn test_invalid_chunk_id_is_skipped_and_stream_continues() {
    let (_dir, store) = temp_store();
    let peer = MockPeer::start("/session/s-2").await.unwrap();

    peer.send_text(r#"{"chunkId":"not-a-uuid","dataBase64":"AAAA"}"#);
    peer.send_chunk(CHUNK_B, b"after the bad one");
    peer.close();

    let summary = within(spawn_worker(&peer, &store, CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        summary,
        IngestSummary {
            stored: 1,
            duplicates: 0,
            skipped: 1
        }
    );
    assert_eq!(store.count(), 1);
    assert_eq!(read_chunk(&store, CHUNK_B).as_deref(), Some(&b"after the bad one"[..]));
}

#[tokio::test]
async fn test_malformed_traffic_never_ends_the_session() {
    let (_dir, store) = temp_store();
    let peer = MockPeer::start("/session/s-3").await.unwrap();

    peer.send_text("this is not json");
    peer.send(Message::Binary(vec![0xde, 0xad, 0xbe, 0xef]));
    peer.send_text("   ");
    peer.send(Message::Ping(vec![1, 2, 3]));
    peer.send_text(format!(r#"{{"chunkId":"{CHUNK_A}","dataBase64":"%%%not base64%%%"}}"#));
    peer.send_chunk(CHUNK_B, b"survivor");
    peer.close();

    let summary = within(spawn_worker(&peer, &store, CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();

    // Non-text frames and blank text are dropped at the channel and not counted.
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.skipped, 2);
    assert!(!store.contains(&chunk_id(CHUNK_A)));
    assert_eq!(read_chunk(&store, CHUNK_B).as_deref(), Some(&b"survivor"[..]));
}

#[tokio::test]
async fn test_duplicate_chunk_keeps_first_bytes() {
    let (_dir, store) = temp_store();
    let peer = MockPeer::start("/session/s-4").await.unwrap();

    peer.send_chunk(CHUNK_A, b"first");
    peer.send_chunk(CHUNK_A, b"second");
    peer.close();

    let summary = within(spawn_worker(&peer, &store, CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.stored, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(store.count(), 1);
    assert_eq!(read_chunk(&store, CHUNK_A).as_deref(), Some(&b"first"[..]));
}

#[tokio::test]
async fn test_chunks_from_concurrent_sessions_all_land() {
    let (_dir, store) = temp_store();
    let mut peers = Vec::new();
    let mut handles = Vec::new();

    for i in 0..4u8 {
        let peer = MockPeer::start(&format!("/session/c-{i}")).await.unwrap();
        for j in 0..5u8 {
            let id = format!("{:08x}-0000-4000-8000-{:012x}", i, j);
            peer.send_chunk(&id, &[i, j]);
        }
        peer.close();
        handles.push(spawn_worker(&peer, &store, CancellationToken::new()));
        peers.push(peer);
    }

    for handle in handles {
        let summary = within(handle).await.unwrap().unwrap();
        assert_eq!(summary.stored, 5);
    }
    assert_eq!(store.count(), 20);
}

#[tokio::test]
async fn test_storage_failure_ends_the_session() {
    let (_dir, store) = temp_store();
    let peer = MockPeer::start("/session/s-5").await.unwrap();
    let handle = spawn_worker(&peer, &store, CancellationToken::new());

    assert!(wait_until(|| peer.connections() == 1).await);
    std::fs::remove_dir_all(store.root()).unwrap();
    peer.send_chunk(CHUNK_A, b"nowhere to go");

    let result = within(handle).await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_dropped_connection_is_an_error() {
    let (_dir, store) = temp_store();
    let peer = MockPeer::start("/session/s-6").await.unwrap();
    peer.send_chunk(CHUNK_A, b"before the drop");
    let handle = spawn_worker(&peer, &store, CancellationToken::new());

    assert!(wait_until(|| store.contains(&chunk_id(CHUNK_A))).await);
    peer.kill();

    let err = within(handle).await.unwrap().unwrap_err();
    assert!(format!("{err:#}").contains("data channel failed"));
    assert_eq!(read_chunk(&store, CHUNK_A).as_deref(), Some(&b"before the drop"[..]));
}

#[tokio::test]
async fn test_unreachable_data_url_fails_without_retry() {
    let (_dir, store) = temp_store();
    let worker = ChunkIngestWorker::new(session_id(), refused_url("/session/x"), store.clone());

    let err = within(worker.run(CancellationToken::new())).await.unwrap_err();
    assert!(err.to_string().contains("could not open data channel"));
    assert_eq!(store.count(), 0);
}

#[tokio::test]
async fn test_secure_data_url_goes_through_tls() {
    let (_dir, store) = temp_store();
    let endpoint = HangUpEndpoint::start().await.unwrap();
    let mut url = endpoint.url.clone();
    url.set_scheme("wss").unwrap();
    let worker = ChunkIngestWorker::new(session_id(), url, store.clone());

    let err = within(worker.run(CancellationToken::new())).await.unwrap_err();
    let detail = format!("{err:#}");
    assert!(detail.contains("could not open data channel"), "{detail}");
    assert!(!detail.contains("TLS support not compiled in"), "{detail}");
    // The TLS client got as far as opening the TCP connection.
    assert!(wait_until(|| !endpoint.attempts().is_empty()).await);
    assert_eq!(store.count(), 0);
}
