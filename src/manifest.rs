//! Manifest Builder: slices a source blob into fixed-size chunks and
//! produces the immutable [`Manifest`] plus a random-access [`Transfer`]
//! view over the chunk bytes.
//!
//! Fixed-size splitting with per-chunk and whole-blob hashing; content here
//! is integrity-hashed, not confidential, so there is no encryption layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{digest, digest_concat};

/// Default chunk size in bytes when no override is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 262_144;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("chunkSize must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk index {index} out of bounds (chunkCount = {chunk_count})")]
    IndexOutOfBounds { index: u32, chunk_count: u32 },
}

/// An immutable description of a chunked blob: its chunk count, per-chunk
/// hashes, and whole-blob hash are fixed at construction and never revised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: u64,
    pub chunk_size: u32,
    pub chunk_count: u32,
    pub whole_hash: String,
    pub chunk_hashes: Vec<String>,
    pub created_at: u64,
}

impl Manifest {
    /// `chunkCount = ceil(fileSize / chunkSize)`, with an empty blob
    /// producing zero chunks rather than one.
    pub fn expected_chunk_count(file_size: u64, chunk_size: u32) -> u32 {
        if file_size == 0 {
            return 0;
        }
        let chunk_size = chunk_size as u64;
        (((file_size + chunk_size - 1) / chunk_size) as u32).max(0)
    }

    /// Byte length of the chunk at `index`, without requiring the bytes
    /// themselves. The final chunk may be shorter than `chunk_size`.
    pub fn chunk_len(&self, index: u32) -> Result<usize, ManifestError> {
        if index >= self.chunk_count {
            return Err(ManifestError::IndexOutOfBounds {
                index,
                chunk_count: self.chunk_count,
            });
        }
        let chunk_size = self.chunk_size as u64;
        let is_last = index as u64 == self.chunk_count as u64 - 1;
        let len = if is_last {
            self.file_size - (self.chunk_count as u64 - 1) * chunk_size
        } else {
            chunk_size
        };
        Ok(len as usize)
    }
}

/// Random-access view over the chunk bytes of a manifest the engine
/// originated. Only the origin node, which still has the source blob in
/// memory, holds a `Transfer`.
pub struct Transfer {
    manifest: Manifest,
    chunks: Vec<Vec<u8>>,
    base64_cache: Vec<Option<String>>,
}

impl Transfer {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Returns the raw bytes for `index`, validating bounds.
    pub fn get_chunk(&self, index: u32) -> Result<&[u8], ManifestError> {
        self.chunks
            .get(index as usize)
            .map(|v| v.as_slice())
            .ok_or(ManifestError::IndexOutOfBounds {
                index,
                chunk_count: self.manifest.chunk_count,
            })
    }

    /// Returns the base64 (standard alphabet) encoding of a chunk, computed
    /// lazily and cached on first access.
    pub fn get_chunk_base64(&mut self, index: u32) -> Result<&str, ManifestError> {
        if index >= self.manifest.chunk_count {
            return Err(ManifestError::IndexOutOfBounds {
                index,
                chunk_count: self.manifest.chunk_count,
            });
        }
        let idx = index as usize;
        if self.base64_cache[idx].is_none() {
            self.base64_cache[idx] = Some(crate::hash::encode_payload(&self.chunks[idx]));
        }
        Ok(self.base64_cache[idx].as_deref().unwrap())
    }
}

/// Builds manifests from a source blob. Stateless; every call produces an
/// independent `(Manifest, Transfer)` pair.
#[derive(Debug)]
pub struct ManifestBuilder {
    chunk_size: u32,
}

impl ManifestBuilder {
    pub fn new(chunk_size: u32) -> Result<Self, ManifestError> {
        if chunk_size == 0 {
            return Err(ManifestError::ZeroChunkSize);
        }
        Ok(Self { chunk_size })
    }

    pub fn with_default_chunk_size() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE as u32,
        }
    }

    /// Splits `bytes` into `chunk_size`-byte fragments in order, computes
    /// per-chunk and whole-blob hashes, and returns the immutable manifest
    /// alongside a `Transfer` view for the caller to keep if it is the
    /// origin of this content.
    pub fn build(
        &self,
        manifest_id: String,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
        created_at: u64,
    ) -> (Manifest, Transfer) {
        let file_size = bytes.len() as u64;
        let chunk_count = Manifest::expected_chunk_count(file_size, self.chunk_size);

        let mut chunks = Vec::with_capacity(chunk_count as usize);
        let mut chunk_hashes = Vec::with_capacity(chunk_count as usize);
        let chunk_size = self.chunk_size as usize;
        for start in (0..bytes.len()).step_by(chunk_size.max(1)) {
            let end = (start + chunk_size).min(bytes.len());
            let chunk = bytes[start..end].to_vec();
            chunk_hashes.push(digest(&chunk));
            chunks.push(chunk);
        }

        let whole_hash = digest_concat(chunks.iter().map(|c| c.as_slice()));
        let base64_cache = vec![None; chunks.len()];

        let manifest = Manifest {
            manifest_id,
            file_name,
            mime_type,
            file_size,
            chunk_size: self.chunk_size,
            chunk_count,
            whole_hash,
            chunk_hashes,
            created_at,
        };

        let transfer = Transfer {
            manifest: manifest.clone(),
            chunks,
            base64_cache,
        };

        (manifest, transfer)
    }

    /// Exposed for peers that verify incoming chunks independently.
    pub fn compute_hash(bytes: &[u8]) -> String {
        digest(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert_eq;

    #[test]
    fn empty_blob_has_zero_chunks() {
        let builder = ManifestBuilder::new(256).unwrap();
        let (manifest, _transfer) = builder.build("m1".into(), "f".into(), "text/plain".into(), vec![], 0);
        assert_eq!(manifest.chunk_count, 0);
        assert_eq!(manifest.file_size, 0);
        assert!(manifest.chunk_hashes.is_empty());
    }

    #[test]
    fn file_size_equal_to_chunk_size_yields_one_chunk() {
        let builder = ManifestBuilder::new(256).unwrap();
        let bytes = vec![7u8; 256];
        let (manifest, _) = builder.build("m1".into(), "f".into(), "text/plain".into(), bytes, 0);
        assert_eq!(manifest.chunk_count, 1);
    }

    #[test]
    fn chunk_count_matches_ceiling_division() {
        let builder = ManifestBuilder::new(256).unwrap();
        let bytes = vec![1u8; 768];
        let (manifest, _) = builder.build("m1".into(), "f".into(), "text/plain".into(), bytes, 0);
        assert_eq!(manifest.chunk_count, 3);
        assert_eq!(
            manifest.chunk_count,
            Manifest::expected_chunk_count(manifest.file_size, manifest.chunk_size)
        );
    }

    #[test]
    fn each_chunk_hash_matches_stored_chunk() {
        let builder = ManifestBuilder::new(100).unwrap();
        let bytes = (0u8..=250).collect::<Vec<_>>();
        let (manifest, transfer) =
            builder.build("m1".into(), "f".into(), "bin".into(), bytes, 0);
        for i in 0..manifest.chunk_count {
            let chunk = transfer.get_chunk(i).unwrap();
            assert_eq!(digest(chunk), manifest.chunk_hashes[i as usize]);
        }
    }

    #[test]
    fn whole_hash_matches_concatenated_chunks() {
        let builder = ManifestBuilder::new(64).unwrap();
        let bytes: Vec<u8> = (0..500).map(|i| (i % 251) as u8).collect();
        let (manifest, transfer) =
            builder.build("m1".into(), "f".into(), "bin".into(), bytes.clone(), 0);
        let mut reconstructed = Vec::new();
        for i in 0..manifest.chunk_count {
            reconstructed.extend_from_slice(transfer.get_chunk(i).unwrap());
        }
        assert_eq!(reconstructed, bytes);
        assert_eq!(digest(&reconstructed), manifest.whole_hash);
    }

    #[test]
    fn last_chunk_length_is_bounded() {
        let builder = ManifestBuilder::new(300).unwrap();
        let bytes = vec![0u8; 950];
        let (manifest, transfer) = builder.build("m1".into(), "f".into(), "bin".into(), bytes, 0);
        let last_index = manifest.chunk_count - 1;
        let last_len = transfer.get_chunk(last_index).unwrap().len();
        assert!(last_len > 0 && last_len <= manifest.chunk_size as usize);
        assert_eq!(last_len, manifest.chunk_len(last_index).unwrap());
    }

    #[test]
    fn base64_round_trips_through_digest() {
        let builder = ManifestBuilder::new(16).unwrap();
        let bytes = vec![9u8; 40];
        let (manifest, mut transfer) =
            builder.build("m1".into(), "f".into(), "bin".into(), bytes, 0);
        let encoded = transfer.get_chunk_base64(0).unwrap().to_string();
        let decoded = crate::hash::decode_payload(&encoded).unwrap();
        assert_eq!(digest(&decoded), manifest.chunk_hashes[0]);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert_eq!(ManifestBuilder::new(0).unwrap_err(), ManifestError::ZeroChunkSize);
    }

    #[test]
    fn out_of_bounds_index_is_rejected() {
        let builder = ManifestBuilder::new(16).unwrap();
        let (_m, transfer) = builder.build("m1".into(), "f".into(), "bin".into(), vec![1, 2, 3], 0);
        assert!(matches!(
            transfer.get_chunk(5),
            Err(ManifestError::IndexOutOfBounds { .. })
        ));
    }

    proptest::proptest! {
        /// Across arbitrary blob sizes and chunk sizes, the builder must
        /// hold its three chunking invariants at once: the chunk count is
        /// the ceiling division of file size over chunk size, every chunk's
        /// hash matches its stored bytes, and the concatenated chunks hash
        /// to the recorded whole-blob hash.
        #[test]
        fn chunking_invariants_hold_for_arbitrary_inputs(
            chunk_size in 1u32..2048,
            file_size in 0usize..4096,
        ) {
            let bytes: Vec<u8> = (0..file_size).map(|i| (i % 256) as u8).collect();
            let builder = ManifestBuilder::new(chunk_size).unwrap();
            let (manifest, transfer) = builder.build("m".into(), "f".into(), "bin".into(), bytes.clone(), 0);

            prop_assert_eq!(
                manifest.chunk_count,
                Manifest::expected_chunk_count(manifest.file_size, manifest.chunk_size)
            );

            let mut reconstructed = Vec::with_capacity(bytes.len());
            for i in 0..manifest.chunk_count {
                let chunk = transfer.get_chunk(i).unwrap();
                prop_assert_eq!(digest(chunk), manifest.chunk_hashes[i as usize].clone());
                reconstructed.extend_from_slice(chunk);
            }
            prop_assert_eq!(&reconstructed, &bytes);
            prop_assert_eq!(digest(&reconstructed), manifest.whole_hash);
        }
    }
}
