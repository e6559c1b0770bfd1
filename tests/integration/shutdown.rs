//! Cancellation and shutdown drain.

use crate::*;

use tokio_util::sync::CancellationToken;

use waypoint_services::{ChunkIngestWorker, Worker, WorkerSupervisor};

const EARLY: &str = "55555555-5555-5555-5555-555555555555";
const LATE: &str = "66666666-6666-6666-6666-666666666666";
const OTHER: &str = "77777777-7777-7777-7777-777777777777";
const BIG_A: &str = "88888888-8888-8888-8888-888888888888";
const BIG_B: &str = "99999999-9999-9999-9999-999999999999";
const LATE_B: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";

#[tokio::test]
async fn test_cancelling_one_session_leaves_others_running() {
    let (_dir, store) = temp_store();
    let peer_a = MockPeer::start("/session/a").await.unwrap();
    let peer_b = MockPeer::start("/session/b").await.unwrap();
    let cancel_a = CancellationToken::new();
    let cancel_b = CancellationToken::new();

    let worker_a = ChunkIngestWorker::new(session_id(), peer_a.url.clone(), store.clone());
    let worker_b = ChunkIngestWorker::new(session_id(), peer_b.url.clone(), store.clone());
    let handle_a = tokio::spawn(worker_a.run(cancel_a.clone()));
    let handle_b = tokio::spawn(worker_b.run(cancel_b.clone()));

    peer_a.send_chunk(EARLY, b"early");
    assert!(wait_until(|| store.contains(&chunk_id(EARLY))).await);

    // A is idle in receive; cancelling must end it promptly and cleanly.
    cancel_a.cancel();
    let summary_a = within(handle_a).await.unwrap().unwrap();
    assert_eq!(summary_a.stored, 1);

    peer_a.send_chunk(LATE, b"late");
    peer_b.send_chunk(OTHER, b"other");
    assert!(wait_until(|| store.contains(&chunk_id(OTHER))).await);
    assert!(!store.contains(&chunk_id(LATE)));

    peer_b.close();
    let summary_b = within(handle_b).await.unwrap().unwrap();
    assert_eq!(summary_b.stored, 1);
    assert!(!cancel_b.is_cancelled());
}

#[tokio::test]
async fn test_supervisor_drains_after_global_cancel() {
    let (_dir, store) = temp_store();
    let peers = [
        MockPeer::start("/session/d-1").await.unwrap(),
        MockPeer::start("/session/d-2").await.unwrap(),
    ];
    let (supervisor, mut reports) = WorkerSupervisor::new();
    let cancel = CancellationToken::new();

    for peer in &peers {
        let worker = ChunkIngestWorker::new(session_id(), peer.url.clone(), store.clone());
        supervisor.spawn(Worker::UploadChunks(worker), cancel.clone());
    }
    assert!(wait_until(|| peers.iter().all(|p| p.connections() == 1)).await);
    assert_eq!(supervisor.active(), 2);

    cancel.cancel();
    within(supervisor.shutdown()).await;
    assert_eq!(supervisor.active(), 0);

    drop(supervisor);
    let mut finished = 0;
    while let Some(report) = within(reports.recv()).await {
        assert!(report.outcome.is_ok());
        finished += 1;
    }
    assert_eq!(finished, 2);
}

#[tokio::test]
async fn test_failed_worker_is_reported_through_supervisor() {
    let (_dir, store) = temp_store();
    let (supervisor, mut reports) = WorkerSupervisor::new();
    let session_id = session_id();
    let worker = ChunkIngestWorker::new(session_id, refused_url("/session/gone"), store);

    supervisor.spawn(Worker::UploadChunks(worker), CancellationToken::new());

    let report = within(reports.recv()).await.unwrap();
    assert_eq!(report.session_id, session_id);
    let err = report.outcome.unwrap_err();
    assert!(err.to_string().contains(&session_id.to_string()));
    within(supervisor.shutdown()).await;
}

#[tokio::test]
async fn test_shared_cancel_lets_in_flight_writes_finish() {
    let (_dir, store) = temp_store();
    let peer_a = MockPeer::start("/session/shared-a").await.unwrap();
    let peer_b = MockPeer::start("/session/shared-b").await.unwrap();
    let cancel = CancellationToken::new();

    let worker_a = ChunkIngestWorker::new(session_id(), peer_a.url.clone(), store.clone());
    let worker_b = ChunkIngestWorker::new(session_id(), peer_b.url.clone(), store.clone());
    let handle_a = tokio::spawn(worker_a.run(cancel.clone()));
    let handle_b = tokio::spawn(worker_b.run(cancel.clone()));
    assert!(wait_until(|| peer_a.connections() == 1 && peer_b.connections() == 1).await);

    let big_a = vec![0xa5u8; 4 << 20];
    let big_b = vec![0x5au8; 4 << 20];
    peer_a.send_chunk(BIG_A, &big_a);
    peer_b.send_chunk(BIG_B, &big_b);

    // Fire the one process-wide token as soon as a write shows up on disk,
    // temp file or final name, so at least one store is in flight or done.
    assert!(wait_until(|| !store_entries(&store).is_empty()).await);
    cancel.cancel();

    let summary_a = within(handle_a).await.unwrap().unwrap();
    let summary_b = within(handle_b).await.unwrap().unwrap();
    assert!(summary_a.stored + summary_b.stored >= 1);

    // Nothing torn: no temp files, and every committed chunk is whole.
    let entries = store_entries(&store);
    assert!(entries.iter().all(|name| name.ends_with(".chunk")), "{entries:?}");
    for (id, expected, stored) in [
        (BIG_A, &big_a, summary_a.stored),
        (BIG_B, &big_b, summary_b.stored),
    ] {
        match read_chunk(&store, id) {
            Some(found) => {
                assert_eq!(found.len(), expected.len());
                assert!(found == *expected, "chunk {id} corrupted");
                assert_eq!(stored, 1);
            }
            None => assert_eq!(stored, 0),
        }
    }

    // No writes once both workers have observed cancellation.
    peer_a.send_chunk(LATE, b"late");
    peer_b.send_chunk(LATE_B, b"late");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!store.contains(&chunk_id(LATE)));
    assert!(!store.contains(&chunk_id(LATE_B)));
    assert_eq!(store.count() as u64, summary_a.stored + summary_b.stored);
}
