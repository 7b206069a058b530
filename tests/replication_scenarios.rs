//! End-to-end replication scenarios composed from the public crate surface:
//! a scheduler driving real session and chunk-store implementations against
//! each other, without a live registry (replica-ack bookkeeping against the
//! registry is best-effort and logged, never fatal to a job's outcome).

use std::collections::HashMap;
use std::sync::Arc;

use dweb_hosting_bot::chunk_store::InMemoryChunkStore;
use dweb_hosting_bot::config::EngineConfig;
use dweb_hosting_bot::manifest::ManifestBuilder;
use dweb_hosting_bot::registry::RegistryClient;
use dweb_hosting_bot::scheduler::ReplicationScheduler;
use dweb_hosting_bot::session::{InMemorySession, PeerSession, SessionEvent, SessionMessage};

fn scheduler(ack_timeout_secs: u64) -> ReplicationScheduler {
    let config = EngineConfig {
        ack_timeout_secs,
        ..EngineConfig::default()
    };
    let registry = Arc::new(RegistryClient::new("http://registry.invalid".into(), None));
    let store = Arc::new(InMemoryChunkStore::new());
    ReplicationScheduler::new(config, registry, store)
}

#[tokio::test]
async fn one_peer_times_out_once_then_succeeds_on_retry() {
    let scheduler = scheduler(1);
    let builder = ManifestBuilder::new(64).unwrap();
    let (manifest, transfer) = builder.build("m-timeout".into(), "f".into(), "bin".into(), vec![1u8; 64], 0);
    scheduler.init_quorum(&manifest.manifest_id, 1).await;

    let (origin_session, origin_events, peer_session, peer_events) = InMemorySession::pair();
    let origin_session: Arc<dyn PeerSession> = Arc::new(origin_session);

    let flaky_peer = tokio::spawn(async move {
        let mut events = peer_events;
        let mut seen_once = false;
        while let Some(event) = events.recv().await {
            if let SessionEvent::Message(SessionMessage::ChunkUpload {
                manifest_id,
                chunk_index,
                ..
            }) = event
            {
                if !seen_once {
                    // Drop the first attempt silently to force an ack-timeout.
                    seen_once = true;
                    continue;
                }
                let ack = SessionMessage::ChunkUploadAck {
                    manifest_id,
                    chunk_index,
                    peer_id: "P1".to_string(),
                    status: "ok".to_string(),
                };
                if peer_session.send_json(&ack).await.is_err() {
                    break;
                }
            }
        }
    });

    let outcome = scheduler
        .run_job(&manifest, &transfer, "P1", origin_session, origin_events)
        .await;
    flaky_peer.abort();

    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts_by_index[&0], 2);
}

#[tokio::test]
async fn quorum_gate_stays_closed_until_enough_peers_ack() {
    let scheduler = scheduler(1);
    let builder = ManifestBuilder::new(64).unwrap();
    let (manifest, transfer) = builder.build("m-quorum".into(), "f".into(), "bin".into(), vec![1u8; 32], 0);
    scheduler.init_quorum(&manifest.manifest_id, 2).await;

    assert!(!scheduler.quorum_snapshot(&manifest.manifest_id).await.unwrap().is_met());

    for peer_id in ["P1", "P2"] {
        let (origin_session, origin_events, peer_session, peer_events) = InMemorySession::pair();
        let origin_session: Arc<dyn PeerSession> = Arc::new(origin_session);
        let peer_id_owned = peer_id.to_string();
        let acker = tokio::spawn(async move {
            let mut events = peer_events;
            if let Some(SessionEvent::Message(SessionMessage::ChunkUpload {
                manifest_id,
                chunk_index,
                ..
            })) = events.recv().await
            {
                let ack = SessionMessage::ChunkUploadAck {
                    manifest_id,
                    chunk_index,
                    peer_id: peer_id_owned,
                    status: "ok".to_string(),
                };
                peer_session.send_json(&ack).await.unwrap();
            }
        });

        let outcome = scheduler
            .run_job(&manifest, &transfer, peer_id, origin_session, origin_events)
            .await;
        acker.await.unwrap();
        assert!(outcome.succeeded);

        let after = scheduler.quorum_snapshot(&manifest.manifest_id).await.unwrap();
        if peer_id == "P1" {
            assert!(!after.is_met(), "quorum should not be met after only one of two required acks");
        } else {
            assert!(after.is_met());
        }
    }
}

#[tokio::test]
async fn nack_with_hash_mismatch_exhausts_retries_and_fails_the_slot() {
    let scheduler = scheduler(1);
    let builder = ManifestBuilder::new(64).unwrap();
    let (manifest, transfer) = builder.build("m-nack".into(), "f".into(), "bin".into(), vec![9u8; 64], 0);
    scheduler.init_quorum(&manifest.manifest_id, 1).await;

    let (origin_session, origin_events, peer_session, peer_events) = InMemorySession::pair();
    let origin_session: Arc<dyn PeerSession> = Arc::new(origin_session);

    let corrupting_peer = tokio::spawn(async move {
        let mut events = peer_events;
        while let Some(event) = events.recv().await {
            if let SessionEvent::Message(SessionMessage::ChunkUpload {
                manifest_id,
                chunk_index,
                ..
            }) = event
            {
                let nack = SessionMessage::ChunkUploadNack {
                    manifest_id,
                    chunk_index,
                    peer_id: "P1".to_string(),
                    reason: "hash-mismatch".to_string(),
                };
                if peer_session.send_json(&nack).await.is_err() {
                    break;
                }
            }
        }
    });

    let outcome = scheduler
        .run_job(&manifest, &transfer, "P1", origin_session, origin_events)
        .await;
    corrupting_peer.abort();

    assert!(!outcome.succeeded);
    assert_eq!(outcome.failed_indexes, vec![0]);
    assert_eq!(outcome.attempts_by_index, HashMap::from([(0, 3)]));

    let quorum = scheduler.quorum_snapshot(&manifest.manifest_id).await.unwrap();
    assert!(!quorum.remote_acks.contains("P1"));
}
