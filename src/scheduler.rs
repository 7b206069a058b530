//! Replication Scheduler: drives a per-(manifest, peer) replica job through
//! its per-chunk state machine to completion or permanent failure, subject
//! to bounded in-flight, retries, backpressure, and cancellation, then
//! updates the quorum gate.
//!
//! A config struct drives a per-chunk holder loop that classifies its
//! outcome as succeeded, partially acked, or failed, and returns a
//! stats-like summary — the per-slot retry/timeout state machine and the
//! exact peer-scoring formula are specific to this scheduler.
//!
//! The single-logical-thread scheduling model maps onto a single `tokio`
//! task per replica job: jobs for different peers run as concurrent tasks,
//! with tokio's cooperative executor interleaving them at `.await` points
//! the same way a manual round-robin turn structure would, while a single
//! job's own progression never runs on more than one task at a time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::chunk_store::ChunkStore;
use crate::config::EngineConfig;
use crate::hash::{digest, encode_payload};
use crate::manifest::{Manifest, Transfer};
use crate::registry::{ChunkReplicaUpdate, RegistryClient, RegistryError};
use crate::session::{PeerSession, SessionEvent, SessionMessage};

pub const BACKPRESSURE_QUANTUM: Duration = Duration::from_millis(25);

/// Metadata about a candidate peer, as surfaced by the peer directory
/// external collaborator.
#[derive(Debug, Clone, Default)]
pub struct Peer {
    pub peer_id: String,
    pub capabilities: HashSet<String>,
    pub last_seen_ms_ago: u64,
    pub latency_ms: Option<u64>,
    pub region: Option<String>,
    pub capacity: Option<u32>,
    pub device_memory_gb: Option<u32>,
    pub uptime_ms: Option<u64>,
}

impl Peer {
    pub fn has_store_capability(&self) -> bool {
        self.capabilities.contains("store")
    }

    fn is_eligible(&self) -> bool {
        self.last_seen_ms_ago <= 60_000 && (self.capabilities.is_empty() || self.has_store_capability())
    }
}

/// Weights are design constants and must be implemented exactly to
/// reproduce ordering deterministically across nodes.
pub fn score_peer(peer: &Peer) -> f64 {
    let base = if peer.has_store_capability() { 40.0 } else { 10.0 };
    let latency_term = peer
        .latency_ms
        .map(|ms| (200.0 - ms as f64).max(0.0) / 5.0)
        .unwrap_or(0.0);
    let capacity_term = peer.capacity.map(|c| (c.min(16)) as f64 * 2.0).unwrap_or(0.0);
    let memory_term = peer
        .device_memory_gb
        .map(|gb| gb.min(16) as f64)
        .unwrap_or(0.0);
    let region_bonus = match &peer.region {
        Some(r) if r != "unknown" => 5.0,
        _ => 0.0,
    };
    let uptime_bonus = peer
        .uptime_ms
        .map(|ms| (ms as f64 / 60_000.0).min(10.0))
        .unwrap_or(0.0);
    let staleness_penalty = (peer.last_seen_ms_ago as f64 / 1000.0).min(120.0) / 2.0;

    base + latency_term + capacity_term + memory_term + region_bonus + uptime_bonus - staleness_penalty
}

#[derive(Debug, Clone)]
pub enum PeerSelectionMode {
    Auto,
    Manual(Vec<String>),
}

/// Selects up to `replica_target` peers from the candidate pool, according
/// to the given selection mode.
pub fn select_peers(
    candidates: &[Peer],
    mode: &PeerSelectionMode,
    replica_target: u8,
) -> Vec<String> {
    match mode {
        PeerSelectionMode::Auto => {
            let mut eligible: Vec<&Peer> = candidates.iter().filter(|p| p.is_eligible()).collect();
            eligible.sort_by(|a, b| {
                let sa = score_peer(a);
                let sb = score_peer(b);
                sb.partial_cmp(&sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.peer_id.cmp(&b.peer_id))
            });
            eligible
                .into_iter()
                .take(replica_target as usize)
                .map(|p| p.peer_id.clone())
                .collect()
        }
        PeerSelectionMode::Manual(peer_ids) => {
            let cap = (replica_target as usize).min(peer_ids.len());
            peer_ids[..cap].to_vec()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSlotStatus {
    Queued,
    InFlight,
    Acked,
    Retry,
    Failed,
}

#[derive(Debug, Clone)]
struct ChunkSlot {
    status: ChunkSlotStatus,
    attempts: u8,
    sent_at: Option<Instant>,
    last_error: Option<String>,
}

impl ChunkSlot {
    fn queued() -> Self {
        Self {
            status: ChunkSlotStatus::Queued,
            attempts: 0,
            sent_at: None,
            last_error: None,
        }
    }
}

/// The outcome of driving a single `(manifestId, peerId)` job to
/// completion.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub peer_id: String,
    pub succeeded: bool,
    pub acked_indexes: Vec<u32>,
    pub failed_indexes: Vec<u32>,
    pub attempts_by_index: HashMap<u32, u8>,
}

/// Keyed by `manifestId`; tracks the replica-quorum gate.
#[derive(Debug, Clone)]
pub struct QuorumState {
    pub required: u8,
    pub remote_acks: HashSet<String>,
    pub updated_at_ms: u64,
    ack_quorum: u8,
}

impl QuorumState {
    pub fn new(replica_target: u8, ack_quorum: u8) -> Self {
        Self {
            required: Self::required_for(replica_target, ack_quorum),
            remote_acks: HashSet::new(),
            updated_at_ms: 0,
            ack_quorum,
        }
    }

    /// `required = max(1, min(ackQuorum, replicaTarget))`.
    fn required_for(replica_target: u8, ack_quorum: u8) -> u8 {
        std::cmp::max(1, std::cmp::min(ack_quorum.max(1), replica_target))
    }

    pub fn is_met(&self) -> bool {
        self.remote_acks.len() as u8 >= self.required
    }

    /// Updates `required` in place without resetting `remoteAcks`.
    pub fn set_replica_target(&mut self, replica_target: u8) {
        self.required = Self::required_for(replica_target, self.ack_quorum);
    }
}

pub struct ReplicationScheduler {
    config: EngineConfig,
    registry: Arc<RegistryClient>,
    chunk_store: Arc<dyn ChunkStore>,
    quorum: AsyncMutex<HashMap<String, QuorumState>>,
}

impl ReplicationScheduler {
    pub fn new(
        config: EngineConfig,
        registry: Arc<RegistryClient>,
        chunk_store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            config,
            registry,
            chunk_store,
            quorum: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Initializes quorum tracking for a freshly registered manifest.
    pub async fn init_quorum(&self, manifest_id: &str, replica_target: u8) {
        let ack_quorum = self.config.ack_quorum;
        let mut guard = self.quorum.lock().await;
        guard
            .entry(manifest_id.to_string())
            .or_insert_with(|| QuorumState::new(replica_target, ack_quorum));
    }

    pub async fn quorum_snapshot(&self, manifest_id: &str) -> Option<QuorumState> {
        self.quorum.lock().await.get(manifest_id).cloned()
    }

    pub async fn clear_quorum(&self, manifest_id: &str) {
        self.quorum.lock().await.remove(manifest_id);
    }

    /// Waits cooperatively while the channel is over the backpressure
    /// threshold. MUST NOT busy-loop; 25ms is the acceptable minimum
    /// granularity for this poll.
    async fn wait_for_backpressure(&self, session: &dyn PeerSession) {
        let threshold = self.config.backpressure_threshold_bytes as u64;
        while session.buffered_amount() > threshold {
            tokio::time::sleep(BACKPRESSURE_QUANTUM).await;
        }
    }

    /// Drives one `(manifestId, peerId)` replica job. `events` must be this
    /// job's exclusive view of the session's inbound stream for the
    /// duration of the call — no other task may read from it concurrently.
    pub async fn run_job(
        &self,
        manifest: &Manifest,
        transfer: &Transfer,
        peer_id: &str,
        session: Arc<dyn PeerSession>,
        mut events: UnboundedReceiver<SessionEvent>,
    ) -> JobOutcome {
        let n = manifest.chunk_count as usize;
        let mut slots: Vec<ChunkSlot> = (0..n).map(|_| ChunkSlot::queued()).collect();
        let ack_timeout = self.config.ack_timeout();

        if n == 0 {
            return JobOutcome {
                peer_id: peer_id.to_string(),
                succeeded: true,
                acked_indexes: vec![],
                failed_indexes: vec![],
                attempts_by_index: HashMap::new(),
            };
        }

        'outer: loop {
            if slots.iter().all(|s| s.status == ChunkSlotStatus::Acked) {
                break;
            }
            let has_pending = slots
                .iter()
                .any(|s| matches!(s.status, ChunkSlotStatus::Queued | ChunkSlotStatus::InFlight | ChunkSlotStatus::Retry));
            if !has_pending {
                break;
            }

            let inflight = slots
                .iter()
                .filter(|s| s.status == ChunkSlotStatus::InFlight)
                .count();
            let mut capacity = (self.config.max_inflight as usize).saturating_sub(inflight);

            for i in 0..n {
                if capacity == 0 {
                    break;
                }
                if !matches!(slots[i].status, ChunkSlotStatus::Queued | ChunkSlotStatus::Retry) {
                    continue;
                }
                if !session.is_open() {
                    break 'outer;
                }
                self.wait_for_backpressure(session.as_ref()).await;
                if !session.is_open() {
                    break 'outer;
                }

                let chunk = match transfer.get_chunk(i as u32) {
                    Ok(c) => c,
                    Err(_) => continue,
                };
                let hash = digest(chunk);
                let data = encode_payload(chunk);
                let message = SessionMessage::ChunkUpload {
                    manifest_id: manifest.manifest_id.clone(),
                    chunk_index: i as u32,
                    data,
                    hash,
                };
                match session.send_json(&message).await {
                    Ok(()) => {
                        slots[i].status = ChunkSlotStatus::InFlight;
                        slots[i].attempts += 1;
                        slots[i].sent_at = Some(Instant::now());
                        capacity -= 1;
                        debug!(manifest_id = %manifest.manifest_id, peer_id, chunk_index = i, attempt = slots[i].attempts, "chunk sent");
                    }
                    Err(_) => {
                        slots[i].status = ChunkSlotStatus::Retry;
                    }
                }
            }

            let earliest_deadline = slots
                .iter()
                .filter(|s| s.status == ChunkSlotStatus::InFlight)
                .filter_map(|s| s.sent_at)
                .map(|t| t + ack_timeout)
                .min();

            let sleep_fut = async {
                match earliest_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(SessionEvent::Message(SessionMessage::ChunkUploadAck { chunk_index, .. })) => {
                            let idx = chunk_index as usize;
                            if idx < n {
                                slots[idx].status = ChunkSlotStatus::Acked;
                                debug!(manifest_id = %manifest.manifest_id, peer_id, chunk_index, "chunk acked");
                            }
                        }
                        Some(SessionEvent::Message(SessionMessage::ChunkUploadNack { chunk_index, reason, .. })) => {
                            let idx = chunk_index as usize;
                            if idx < n {
                                slots[idx].last_error = Some(reason);
                                if slots[idx].attempts >= self.config.max_retries {
                                    slots[idx].status = ChunkSlotStatus::Failed;
                                } else {
                                    slots[idx].status = ChunkSlotStatus::Retry;
                                }
                            }
                        }
                        Some(SessionEvent::Closed) | None => {
                            for slot in slots.iter_mut() {
                                if slot.status == ChunkSlotStatus::InFlight {
                                    slot.status = ChunkSlotStatus::Retry;
                                }
                            }
                            if !session.is_open() {
                                break 'outer;
                            }
                        }
                        _ => {}
                    }
                }
                _ = sleep_fut => {
                    for slot in slots.iter_mut() {
                        if slot.status == ChunkSlotStatus::InFlight {
                            let timed_out = slot
                                .sent_at
                                .map(|t| t.elapsed() >= ack_timeout)
                                .unwrap_or(false);
                            if timed_out {
                                slot.last_error = Some("ack-timeout".to_string());
                                if slot.attempts >= self.config.max_retries {
                                    slot.status = ChunkSlotStatus::Failed;
                                } else {
                                    slot.status = ChunkSlotStatus::Retry;
                                }
                            }
                        }
                    }
                }
            }

            tokio::task::yield_now().await;
        }

        let acked_indexes: Vec<u32> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == ChunkSlotStatus::Acked)
            .map(|(i, _)| i as u32)
            .collect();
        let failed_indexes: Vec<u32> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status != ChunkSlotStatus::Acked)
            .map(|(i, _)| i as u32)
            .collect();
        let attempts_by_index = slots
            .iter()
            .enumerate()
            .map(|(i, s)| (i as u32, s.attempts))
            .collect();

        let succeeded = failed_indexes.is_empty();

        if succeeded {
            let update = ChunkReplicaUpdate {
                peer_id: peer_id.to_string(),
                chunk_indexes: acked_indexes.clone(),
                status: "available".to_string(),
                replicated_at: 0,
            };
            match self
                .registry
                .update_chunk_replica(&manifest.manifest_id, &update)
                .await
            {
                Ok(()) => {
                    let mut guard = self.quorum.lock().await;
                    if let Some(state) = guard.get_mut(&manifest.manifest_id) {
                        state.remote_acks.insert(peer_id.to_string());
                        info!(manifest_id = %manifest.manifest_id, peer_id, "replica acked, quorum updated");
                    }
                }
                Err(e) => {
                    warn!(manifest_id = %manifest.manifest_id, peer_id, error = %e, "registry replica update failed; replica remains durable on peer");
                }
            }
        } else if self.config.upload_chunks_to_storage {
            self.storage_fallback(manifest, transfer, &failed_indexes).await;
        }

        JobOutcome {
            peer_id: peer_id.to_string(),
            succeeded,
            acked_indexes,
            failed_indexes,
            attempts_by_index,
        }
    }

    /// Uploads chunks that failed replication to the storage service, then
    /// points the registry at them. Existing pointers are not overwritten
    /// (the registry enforces that; the client does not track pointer
    /// presence locally).
    async fn storage_fallback(&self, manifest: &Manifest, transfer: &Transfer, failed_indexes: &[u32]) {
        let Some(storage_base) = &self.config.storage_base_url else {
            return;
        };
        for &index in failed_indexes {
            let Ok(chunk) = transfer.get_chunk(index) else {
                continue;
            };
            let data = encode_payload(chunk);
            if let Err(e) = self
                .registry
                .upload_chunk(&manifest.manifest_id, index, &data)
                .await
            {
                warn!(manifest_id = %manifest.manifest_id, chunk_index = index, error = %e, "storage fallback upload failed");
                continue;
            }
            let pointer = crate::registry::storage_pointer(storage_base, &manifest.manifest_id, index);
            let update = crate::registry::ChunkPointerUpdate {
                pointer,
                remove_data: !self.config.store_chunk_data,
                expires_at: None,
            };
            if let Err(e) = self
                .registry
                .update_chunk_pointer(&manifest.manifest_id, index, &update)
                .await
            {
                warn!(manifest_id = %manifest.manifest_id, chunk_index = index, error = %e, "storage fallback pointer update failed");
            }
        }
    }

    /// Caches every chunk locally on the origin at publication time.
    pub async fn cache_all_chunks(&self, manifest: &Manifest, transfer: &Transfer) -> Result<(), RegistryError> {
        self.chunk_store
            .init_manifest(&manifest.manifest_id, manifest.chunk_count)
            .await;
        for i in 0..manifest.chunk_count {
            if let Ok(bytes) = transfer.get_chunk(i) {
                let _ = self.chunk_store.put(&manifest.manifest_id, i, bytes.to_vec()).await;
            }
        }
        Ok(())
    }
}
