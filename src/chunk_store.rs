//! Chunk Store: a process-local, content-addressed cache of chunk bytes.
//!
//! A trait behind a mockable in-memory implementation, narrowed to a plain
//! `put`/`get`/`drop` contract — no holder/attestation concept belongs at
//! this layer, that is the Scheduler's concern.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("chunk index {index} out of bounds (stored length {stored_len})")]
    IndexOutOfBounds { index: u32, stored_len: u32 },
    #[error("manifest {0} is not known to the store")]
    UnknownManifest(String),
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Registers a manifest's chunk slots, sized for `chunk_count` entries,
    /// all initially empty. Idempotent: calling again for the same
    /// manifest id with the same length is a no-op.
    async fn init_manifest(&self, manifest_id: &str, chunk_count: u32);

    /// Stores bytes at `(manifest_id, index)`. Insertion is idempotent; the
    /// store MAY replace an existing slot with byte-equal data.
    async fn put(&self, manifest_id: &str, index: u32, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Retrieves bytes previously stored at `(manifest_id, index)`, if any.
    async fn get(&self, manifest_id: &str, index: u32) -> Result<Option<Vec<u8>>, StoreError>;

    /// Evicts all chunks for a manifest.
    async fn drop_manifest(&self, manifest_id: &str);
}

/// In-memory implementation backing the origin's cache and the test suite.
#[derive(Default)]
pub struct InMemoryChunkStore {
    inner: Mutex<HashMap<String, Vec<Option<Vec<u8>>>>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn init_manifest(&self, manifest_id: &str, chunk_count: u32) {
        let mut guard = self.inner.lock().expect("chunk store mutex poisoned");
        guard
            .entry(manifest_id.to_string())
            .or_insert_with(|| vec![None; chunk_count as usize]);
    }

    async fn put(&self, manifest_id: &str, index: u32, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().expect("chunk store mutex poisoned");
        let slots = guard
            .get_mut(manifest_id)
            .ok_or_else(|| StoreError::UnknownManifest(manifest_id.to_string()))?;
        let idx = index as usize;
        if idx >= slots.len() {
            return Err(StoreError::IndexOutOfBounds {
                index,
                stored_len: slots.len() as u32,
            });
        }
        slots[idx] = Some(bytes);
        Ok(())
    }

    async fn get(&self, manifest_id: &str, index: u32) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.lock().expect("chunk store mutex poisoned");
        let slots = match guard.get(manifest_id) {
            Some(slots) => slots,
            None => return Ok(None),
        };
        let idx = index as usize;
        if idx >= slots.len() {
            return Err(StoreError::IndexOutOfBounds {
                index,
                stored_len: slots.len() as u32,
            });
        }
        Ok(slots[idx].clone())
    }

    async fn drop_manifest(&self, manifest_id: &str) {
        let mut guard = self.inner.lock().expect("chunk store mutex poisoned");
        guard.remove(manifest_id);
    }
}
