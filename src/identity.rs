//! Identity: Ed25519 keypair generation, owner-id derivation, and signing,
//! with private key material persisted in an isolated local store and
//! zeroized on drop.
//!
//! Follows the crate's usual crypto-module conventions (thiserror error
//! enums, zeroize-on-drop for key material) applied to `ring::signature`'s
//! Ed25519 implementation, since domain bindings need an asymmetric
//! sign/verify contract rather than a symmetric one.

use std::fs;
use std::path::{Path, PathBuf};

use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::hash::digest;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("cryptographic primitives unavailable: {0}")]
    CryptoUnavailable(String),
    #[error("local identity store error: {0}")]
    Store(#[from] std::io::Error),
    #[error("local identity store contained invalid data: {0}")]
    Corrupt(String),
}

/// An Ed25519 keypair plus the owner id derived from its public key.
pub struct Identity {
    owner_id: String,
    public_key: Vec<u8>,
    pkcs8: Pkcs8Bytes,
}

/// Wraps the PKCS#8-encoded private key so it is zeroized on drop without
/// requiring `Identity` itself to implement `Zeroize` over non-sensitive
/// fields.
struct Pkcs8Bytes(Vec<u8>);

impl Drop for Pkcs8Bytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl Identity {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn key_pair(&self) -> Result<Ed25519KeyPair, IdentityError> {
        Ed25519KeyPair::from_pkcs8(&self.pkcs8.0)
            .map_err(|e| IdentityError::CryptoUnavailable(e.to_string()))
    }

    /// Signs an opaque payload with this identity's private key.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, IdentityError> {
        let key_pair = self.key_pair()?;
        Ok(key_pair.sign(payload).as_ref().to_vec())
    }
}

/// `ownerIdOf(pub) -> string`: deterministic, collision-resistant.
pub fn owner_id_of(public_key: &[u8]) -> String {
    format!("did:dweb:{}", digest(public_key))
}

/// Creates a fresh Ed25519 identity.
pub fn create_identity() -> Result<Identity, IdentityError> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|e| IdentityError::CryptoUnavailable(e.to_string()))?;
    let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
        .map_err(|e| IdentityError::CryptoUnavailable(e.to_string()))?;
    let public_key = key_pair.public_key().as_ref().to_vec();
    let owner_id = owner_id_of(&public_key);
    Ok(Identity {
        owner_id,
        public_key,
        pkcs8: Pkcs8Bytes(pkcs8.as_ref().to_vec()),
    })
}

/// Verifies a signature produced by `sign`. Does not require an `Identity`:
/// any holder of the public key bytes can verify.
pub fn verify(public_key: &[u8], payload: &[u8], signature: &[u8]) -> bool {
    let public_key = signature::UnparsedPublicKey::new(&signature::ED25519, public_key);
    public_key.verify(payload, signature).is_ok()
}

#[derive(Serialize, Deserialize)]
struct PersistedIdentity {
    owner_id: String,
    public_key_b64: String,
    pkcs8_b64: String,
}

/// Persists an identity's key material under `dir/<ownerId>.toml`.
pub fn store(dir: &Path, identity: &Identity) -> Result<(), IdentityError> {
    fs::create_dir_all(dir)?;
    let record = PersistedIdentity {
        owner_id: identity.owner_id.clone(),
        public_key_b64: crate::hash::encode_payload(&identity.public_key),
        pkcs8_b64: crate::hash::encode_payload(&identity.pkcs8.0),
    };
    let toml = toml::to_string_pretty(&record)
        .map_err(|e| IdentityError::Corrupt(format!("failed to serialize identity: {e}")))?;
    fs::write(identity_path(dir, &identity.owner_id), toml)?;
    Ok(())
}

/// Loads a previously stored identity, or `None` if absent.
pub fn load(dir: &Path, owner_id: &str) -> Result<Option<Identity>, IdentityError> {
    let path = identity_path(dir, owner_id);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    let record: PersistedIdentity = toml::from_str(&contents)
        .map_err(|e| IdentityError::Corrupt(format!("failed to parse identity file: {e}")))?;
    let public_key = crate::hash::decode_payload(&record.public_key_b64)
        .map_err(|e| IdentityError::Corrupt(e.to_string()))?;
    let pkcs8 = crate::hash::decode_payload(&record.pkcs8_b64)
        .map_err(|e| IdentityError::Corrupt(e.to_string()))?;
    // Validate the key material decodes before handing it back.
    Ed25519KeyPair::from_pkcs8(&pkcs8)
        .map_err(|e| IdentityError::Corrupt(format!("stored key material invalid: {e}")))?;
    Ok(Some(Identity {
        owner_id: record.owner_id,
        public_key,
        pkcs8: Pkcs8Bytes(pkcs8),
    }))
}

fn identity_path(dir: &Path, owner_id: &str) -> PathBuf {
    let safe_name = owner_id.replace([':', '/'], "_");
    dir.join(format!("{safe_name}.toml"))
}

/// Lists every identity persisted under `dir`, skipping files that are not
/// valid identity records rather than failing the whole listing.
pub fn list(dir: &Path) -> Result<Vec<Identity>, IdentityError> {
    let mut identities = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(identities),
        Err(e) => return Err(IdentityError::Store(e)),
    };
    for entry in entries.flatten() {
        if entry.path().extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let Ok(contents) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let Ok(record) = toml::from_str::<PersistedIdentity>(&contents) else {
            continue;
        };
        let (Ok(public_key), Ok(pkcs8)) = (
            crate::hash::decode_payload(&record.public_key_b64),
            crate::hash::decode_payload(&record.pkcs8_b64),
        ) else {
            continue;
        };
        identities.push(Identity {
            owner_id: record.owner_id,
            public_key,
            pkcs8: Pkcs8Bytes(pkcs8),
        });
    }
    Ok(identities)
}
