//! Chunk Retriever: resolves a single chunk by walking a fixed priority
//! chain — local cache, then the in-process origin transfer, then a live
//! remote peer, then the storage service's fallback pointer — verifying the
//! manifest-pinned hash at every remote step before the chunk is trusted or
//! cached.
//!
//! A fast local path falls through to progressively more expensive network
//! tiers, surfacing a typed not-found outcome only once every tier has been
//! exhausted.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::chunk_store::ChunkStore;
use crate::hash::digest;
use crate::manifest::{Manifest, Transfer};
use crate::registry::RegistryClient;
use crate::session::{PeerSession, SessionEvent, SessionMessage};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetrieverError {
    #[error("chunk index {0} is out of range for this manifest")]
    IndexOutOfRange(u32),
    #[error("retrieved chunk failed hash verification against the manifest")]
    HashMismatch,
    #[error("chunk {chunk_index} of manifest {manifest_id} could not be retrieved from any source")]
    Unavailable { manifest_id: String, chunk_index: u32 },
}

/// Which tier ultimately produced the bytes, useful for tests and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalSource {
    LocalCache,
    OriginTransfer,
    RemotePeer,
    StoragePointer,
}

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub bytes: Vec<u8>,
    pub source: RetrievalSource,
}

pub struct ChunkRetriever {
    chunk_store: Arc<dyn ChunkStore>,
    registry: Arc<RegistryClient>,
    remote_timeout: Duration,
}

impl ChunkRetriever {
    pub fn new(chunk_store: Arc<dyn ChunkStore>, registry: Arc<RegistryClient>, remote_timeout: Duration) -> Self {
        Self {
            chunk_store,
            registry,
            remote_timeout,
        }
    }

    fn verify(manifest: &Manifest, index: u32, bytes: &[u8]) -> Result<(), RetrieverError> {
        let expected = manifest
            .chunk_hashes
            .get(index as usize)
            .ok_or(RetrieverError::IndexOutOfRange(index))?;
        if &digest(bytes) != expected {
            return Err(RetrieverError::HashMismatch);
        }
        Ok(())
    }

    /// Step 1: local cache. Never hash-checked again on the way out — it
    /// was verified before being cached by whichever tier put it there.
    async fn try_local_cache(&self, manifest_id: &str, index: u32) -> Option<Vec<u8>> {
        match self.chunk_store.get(manifest_id, index).await {
            Ok(Some(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Step 2: the in-process origin transfer, when this node originated
    /// the content and still holds the full blob.
    fn try_origin_transfer(transfer: Option<&Transfer>, index: u32) -> Option<Vec<u8>> {
        transfer.and_then(|t| t.get_chunk(index).ok().map(|b| b.to_vec()))
    }

    /// Step 3: request the chunk from a connected remote peer, bounded by
    /// the ack-timeout budget.
    async fn try_remote_peer(
        &self,
        manifest: &Manifest,
        index: u32,
        session: &Arc<dyn PeerSession>,
        events: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Option<Vec<u8>> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let request = SessionMessage::ChunkRequest {
            request_id: request_id.clone(),
            manifest_id: manifest.manifest_id.clone(),
            chunk_index: index,
        };
        if session.send_json(&request).await.is_err() {
            return None;
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Some(SessionEvent::Message(SessionMessage::ChunkResponse {
                        request_id: rid,
                        chunk_index,
                        data,
                        ..
                    })) if rid == request_id && chunk_index == index => {
                        return crate::hash::decode_payload(&data).ok();
                    }
                    Some(SessionEvent::Message(SessionMessage::ChunkError { request_id: rid, .. }))
                        if rid == request_id =>
                    {
                        return None;
                    }
                    Some(SessionEvent::Closed) | None => return None,
                    _ => continue,
                }
            }
        };

        match tokio::time::timeout(self.remote_timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                debug!(manifest_id = %manifest.manifest_id, chunk_index = index, "remote peer request timed out");
                None
            }
        }
    }

    /// Step 4: the storage service's fallback pointer, addressed as
    /// `storageBase + "/chunks/" + manifestId + "/" + chunkIndex"`.
    async fn try_storage_pointer(&self, manifest_id: &str, index: u32) -> Option<Vec<u8>> {
        match self.registry.download_chunk(manifest_id, index).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(manifest_id, chunk_index = index, error = %e, "storage pointer fetch failed");
                None
            }
        }
    }

    /// Resolves a chunk by walking the full priority chain, caching it
    /// locally once a remote tier produces a verified result.
    pub async fn retrieve(
        &self,
        manifest: &Manifest,
        index: u32,
        origin_transfer: Option<&Transfer>,
        remote_peer: Option<(&Arc<dyn PeerSession>, &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>)>,
    ) -> Result<RetrievedChunk, RetrieverError> {
        if index >= manifest.chunk_count {
            return Err(RetrieverError::IndexOutOfRange(index));
        }

        if let Some(bytes) = self.try_local_cache(&manifest.manifest_id, index).await {
            return Ok(RetrievedChunk {
                bytes,
                source: RetrievalSource::LocalCache,
            });
        }

        if let Some(bytes) = Self::try_origin_transfer(origin_transfer, index) {
            Self::verify(manifest, index, &bytes)?;
            return Ok(RetrievedChunk {
                bytes,
                source: RetrievalSource::OriginTransfer,
            });
        }

        if let Some((session, events)) = remote_peer {
            if let Some(bytes) = self.try_remote_peer(manifest, index, session, events).await {
                if Self::verify(manifest, index, &bytes).is_ok() {
                    self.chunk_store.init_manifest(&manifest.manifest_id, manifest.chunk_count).await;
                    let _ = self.chunk_store.put(&manifest.manifest_id, index, bytes.clone()).await;
                    return Ok(RetrievedChunk {
                        bytes,
                        source: RetrievalSource::RemotePeer,
                    });
                }
                warn!(manifest_id = %manifest.manifest_id, chunk_index = index, "remote peer chunk failed verification, falling through");
            }
        }

        if let Some(bytes) = self.try_storage_pointer(&manifest.manifest_id, index).await {
            Self::verify(manifest, index, &bytes)?;
            self.chunk_store.init_manifest(&manifest.manifest_id, manifest.chunk_count).await;
            let _ = self.chunk_store.put(&manifest.manifest_id, index, bytes.clone()).await;
            return Ok(RetrievedChunk {
                bytes,
                source: RetrievalSource::StoragePointer,
            });
        }

        Err(RetrieverError::Unavailable {
            manifest_id: manifest.manifest_id.clone(),
            chunk_index: index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::InMemoryChunkStore;
    use crate::manifest::ManifestBuilder;
    use crate::session::InMemorySession;

    fn build() -> (Manifest, Transfer) {
        let builder = ManifestBuilder::new(64).unwrap();
        builder.build("m1".into(), "f".into(), "bin".into(), vec![5u8; 130], 0)
    }

    #[tokio::test]
    async fn local_cache_hit_short_circuits_everything_else() {
        let (manifest, _transfer) = build();
        let store = Arc::new(InMemoryChunkStore::new());
        store.init_manifest(&manifest.manifest_id, manifest.chunk_count).await;
        store.put(&manifest.manifest_id, 0, vec![9, 9, 9]).await.unwrap();

        let registry = Arc::new(RegistryClient::new("http://registry.invalid".into(), None));
        let retriever = ChunkRetriever::new(store, registry, Duration::from_secs(1));

        let result = retriever.retrieve(&manifest, 0, None, None).await.unwrap();
        assert_eq!(result.bytes, vec![9, 9, 9]);
        assert_eq!(result.source, RetrievalSource::LocalCache);
    }

    #[tokio::test]
    async fn falls_back_to_origin_transfer_and_verifies_hash() {
        let (manifest, transfer) = build();
        let store = Arc::new(InMemoryChunkStore::new());
        let registry = Arc::new(RegistryClient::new("http://registry.invalid".into(), None));
        let retriever = ChunkRetriever::new(store, registry, Duration::from_secs(1));

        let result = retriever
            .retrieve(&manifest, 1, Some(&transfer), None)
            .await
            .unwrap();
        assert_eq!(result.source, RetrievalSource::OriginTransfer);
        assert_eq!(result.bytes, transfer.get_chunk(1).unwrap());
    }

    #[tokio::test]
    async fn remote_peer_response_is_cached_for_next_lookup() {
        let (manifest, transfer) = build();
        let store = Arc::new(InMemoryChunkStore::new());
        let registry = Arc::new(RegistryClient::new("http://registry.invalid".into(), None));
        let retriever = ChunkRetriever::new(store.clone(), registry, Duration::from_secs(1));

        let (origin_session, mut origin_events, peer_session, peer_events) = InMemorySession::pair();
        let origin_session: Arc<dyn PeerSession> = Arc::new(origin_session);
        let chunk_bytes = transfer.get_chunk(0).unwrap().to_vec();

        let responder = tokio::spawn(async move {
            let mut events = peer_events;
            if let Some(SessionEvent::Message(SessionMessage::ChunkRequest { request_id, chunk_index, .. })) =
                events.recv().await
            {
                let response = SessionMessage::ChunkResponse {
                    request_id,
                    manifest_id: "m1".to_string(),
                    chunk_index,
                    data: crate::hash::encode_payload(&chunk_bytes),
                };
                peer_session.send_json(&response).await.unwrap();
            }
        });

        let result = retriever
            .retrieve(&manifest, 0, None, Some((&origin_session, &mut origin_events)))
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(result.source, RetrievalSource::RemotePeer);
        assert_eq!(store.get(&manifest.manifest_id, 0).await.unwrap(), Some(result.bytes));
    }

    #[tokio::test]
    async fn index_out_of_range_is_rejected_before_any_tier_is_tried() {
        let (manifest, _) = build();
        let store = Arc::new(InMemoryChunkStore::new());
        let registry = Arc::new(RegistryClient::new("http://registry.invalid".into(), None));
        let retriever = ChunkRetriever::new(store, registry, Duration::from_secs(1));

        let result = retriever.retrieve(&manifest, 99, None, None).await;
        assert!(matches!(result, Err(RetrieverError::IndexOutOfRange(99))));
    }

    #[tokio::test]
    async fn exhausting_every_tier_reports_unavailable() {
        let (manifest, _) = build();
        let store = Arc::new(InMemoryChunkStore::new());
        let registry = Arc::new(RegistryClient::new("http://registry.invalid".into(), None));
        let retriever = ChunkRetriever::new(store, registry, Duration::from_millis(20));

        let result = retriever.retrieve(&manifest, 0, None, None).await;
        assert!(matches!(result, Err(RetrieverError::Unavailable { .. })));
    }
}
