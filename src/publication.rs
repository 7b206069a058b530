//! Publication Controller: orchestrates the other components end to end —
//! build a manifest, register it, cache chunks locally, hand replication
//! jobs to the Scheduler, and once the quorum gate is satisfied, sign and
//! publish the domain binding.
//!
//! Wires several collaborators together behind one entry point and maps
//! their errors into one top-level error type, the way a CLI command
//! handler would, except this module has no terminal I/O of its own: it is
//! a library seam the CLI layer calls into.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, instrument};

use crate::chunk_store::ChunkStore;
use crate::config::EngineConfig;
use crate::identity::{Identity, IdentityError};
use crate::manifest::{Manifest, ManifestBuilder, Transfer};
use crate::registry::{DomainBindingDiff, DomainRecord, RegistryClient, RegistryError};
use crate::scheduler::{Peer, ReplicationScheduler};
use crate::session::{PeerSession, SessionEvent};

#[derive(Debug, Error)]
pub enum PublicationError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("signing error: {0}")]
    Signing(#[from] IdentityError),
    #[error("replica target must be at least 1 and at most {0}")]
    InvalidReplicaTarget(u8),
    #[error("replication quorum for manifest {0} is not yet met; domain binding is blocked")]
    QuorumNotMet(String),
}

#[derive(Debug, Clone)]
pub struct PublicationOutcome {
    pub manifest: Manifest,
    pub peers_attempted: Vec<String>,
    pub peers_acked: Vec<String>,
    pub quorum_met: bool,
}

/// A connected peer handed to the controller by the peer-discovery
/// collaborator, ready for the scheduler to drive a replication job over.
pub struct ReplicationTarget {
    pub peer: Peer,
    pub session: Arc<dyn PeerSession>,
    pub events: UnboundedReceiver<SessionEvent>,
}

pub struct PublicationController {
    config: EngineConfig,
    registry: Arc<RegistryClient>,
    scheduler: Arc<ReplicationScheduler>,
}

impl PublicationController {
    pub fn new(config: EngineConfig, registry: Arc<RegistryClient>, chunk_store: Arc<dyn ChunkStore>) -> Self {
        let scheduler = Arc::new(ReplicationScheduler::new(config.clone(), registry.clone(), chunk_store));
        Self {
            config,
            registry,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> Arc<ReplicationScheduler> {
        self.scheduler.clone()
    }

    fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Builds a manifest from `bytes`, registers it, caches every chunk on
    /// the origin, then drives replication against `targets`. Empty
    /// manifests (`fileSize == 0`) are treated as immediately
    /// quorum-satisfied: there are no chunks to replicate, so there is
    /// nothing for the gate to withhold progress on.
    #[instrument(skip(self, bytes, targets), fields(file_name = %file_name))]
    pub async fn publish(
        &self,
        manifest_id: String,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
        targets: Vec<ReplicationTarget>,
    ) -> Result<PublicationOutcome, PublicationError> {
        let builder = ManifestBuilder::new(self.config.chunk_size)
            .expect("EngineConfig::validate rejects a zero chunk_size before construction");
        let (manifest, transfer) = builder.build(manifest_id, file_name, mime_type, bytes, Self::now_unix());

        let record = crate::registry::ManifestRecord {
            manifest_id: manifest.manifest_id.clone(),
            file_name: manifest.file_name.clone(),
            mime_type: manifest.mime_type.clone(),
            file_size: manifest.file_size,
            chunk_size: manifest.chunk_size,
            chunk_count: manifest.chunk_count,
            whole_hash: manifest.whole_hash.clone(),
            chunk_hashes: manifest.chunk_hashes.clone(),
            created_at: manifest.created_at,
            chunk_data: vec![None; manifest.chunk_count as usize],
            chunk_pointers: vec![None; manifest.chunk_count as usize],
            chunk_replicas: vec![Vec::new(); manifest.chunk_count as usize],
        };
        self.registry.register_manifest(&record).await?;
        self.scheduler.cache_all_chunks(&manifest, &transfer).await?;

        if manifest.chunk_count == 0 {
            info!(manifest_id = %manifest.manifest_id, "empty manifest published, quorum satisfied trivially");
            return Ok(PublicationOutcome {
                manifest,
                peers_attempted: vec![],
                peers_acked: vec![],
                quorum_met: true,
            });
        }

        let replica_target = targets.len().min(self.config.max_replica_targets as usize) as u8;
        self.scheduler
            .init_quorum(&manifest.manifest_id, replica_target.max(1))
            .await;

        let peers_attempted: Vec<String> = targets.iter().map(|t| t.peer.peer_id.clone()).collect();
        let mut peers_acked = Vec::new();

        let manifest = Arc::new(manifest);
        let transfer = Arc::new(transfer);
        let handles: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let manifest = manifest.clone();
                let transfer = transfer.clone();
                let scheduler = self.scheduler.clone();
                let peer_id = target.peer.peer_id.clone();
                tokio::spawn(async move {
                    scheduler
                        .run_job(&manifest, &transfer, &peer_id, target.session, target.events)
                        .await
                })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            if let Ok(outcome) = result {
                if outcome.succeeded {
                    peers_acked.push(outcome.peer_id);
                }
            }
        }

        let quorum_met = self
            .scheduler
            .quorum_snapshot(&manifest.manifest_id)
            .await
            .map(|q| q.is_met())
            .unwrap_or(false);

        Ok(PublicationOutcome {
            manifest: Arc::try_unwrap(manifest).unwrap_or_else(|arc| (*arc).clone()),
            peers_attempted,
            peers_acked,
            quorum_met,
        })
    }

    /// Binds (or rebinds) a domain to a manifest. Rejects the binding
    /// outright, without signing or touching the registry, unless the
    /// manifest's replication quorum is already satisfied: an unknown
    /// manifest (no quorum ever initialized for it) is treated as not met.
    pub async fn bind_domain(
        &self,
        identity: &Identity,
        domain: &str,
        manifest_id: &str,
    ) -> Result<(), PublicationError> {
        let quorum_met = self
            .scheduler
            .quorum_snapshot(manifest_id)
            .await
            .map(|q| q.is_met())
            .unwrap_or(false);
        if !quorum_met {
            return Err(PublicationError::QuorumNotMet(manifest_id.to_string()));
        }

        let domain = domain.to_lowercase();
        let updated_at = Self::now_unix();
        let payload = domain_signing_payload(&domain, identity.owner_id(), manifest_id, updated_at);
        let signature = identity.sign(&payload)?;

        match self.registry.get_domain(&domain).await? {
            Some(_) => {
                let diff = DomainBindingDiff {
                    manifest_id: Some(manifest_id.to_string()),
                    signature: Some(hex::encode(signature)),
                    updated_at: Some(updated_at),
                };
                self.registry.update_domain_binding(&domain, &diff).await?;
            }
            None => {
                let record = DomainRecord {
                    domain: domain.clone(),
                    owner: identity.owner_id().to_string(),
                    manifest_id: manifest_id.to_string(),
                    signature: hex::encode(signature),
                    public_key: crate::hash::encode_payload(identity.public_key()),
                    updated_at,
                };
                self.registry.register_domain(&record).await?;
            }
        }
        Ok(())
    }
}

/// The canonical JSON document signed (and later re-derived for
/// verification) over a domain binding: `{domain, owner, manifestId,
/// timestamp}`, field order fixed by struct declaration order and each
/// field serialized through `serde_json`'s default (escaped, non-pretty)
/// encoding so the byte sequence is reproducible across nodes.
#[derive(Serialize)]
struct DomainBindingPayload<'a> {
    domain: &'a str,
    owner: &'a str,
    #[serde(rename = "manifestId")]
    manifest_id: &'a str,
    timestamp: u64,
}

pub fn domain_signing_payload(domain: &str, owner: &str, manifest_id: &str, timestamp: u64) -> Vec<u8> {
    let payload = DomainBindingPayload {
        domain,
        owner,
        manifest_id,
        timestamp,
    };
    serde_json::to_vec(&payload).expect("DomainBindingPayload fields are plain strings and a u64, always serializable")
}
