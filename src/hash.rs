//! Content-addressing primitives shared by the manifest, chunk store, and
//! peer session wire format.
//!
//! `digest` is the `H` function from the data model: SHA-256 over raw bytes,
//! encoded with the URL-safe base64 alphabet and no padding. Chunk payloads
//! on the wire use the standard, padded alphabet instead; `encode_payload`
//! and `decode_payload` wrap that distinction so call sites never reach for
//! the wrong one.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};

/// Computes `H(bytes)`: SHA-256, base64url, unpadded.
pub fn digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    URL_SAFE_NO_PAD.encode(hash)
}

/// Computes `H` over the concatenation of a chunk sequence without
/// materializing the concatenated buffer, used for the whole-blob hash.
pub fn digest_concat<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Encodes a chunk payload for wire transport: standard alphabet, padded.
pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes a chunk payload received over the wire.
pub fn decode_payload(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest(b"hello"), digest(b"hello"));
    }

    #[test]
    fn digest_has_no_padding_and_is_url_safe() {
        let h = digest(b"");
        assert!(!h.contains('='));
        assert!(!h.contains('+'));
        assert!(!h.contains('/'));
    }

    #[test]
    fn digest_concat_matches_digest_of_joined_bytes() {
        let a = b"abc".to_vec();
        let b = b"defg".to_vec();
        let joined = [a.as_slice(), b.as_slice()].concat();
        assert_eq!(digest_concat([a.as_slice(), b.as_slice()]), digest(&joined));
    }

    #[test]
    fn payload_round_trips() {
        let bytes = vec![0u8, 1, 2, 255, 254, 7];
        let encoded = encode_payload(&bytes);
        let decoded = decode_payload(&encoded).unwrap();
        assert_eq!(decoded, bytes);
        assert_eq!(digest(&decode_payload(&encoded).unwrap()), digest(&bytes));
    }
}
