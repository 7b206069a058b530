//! Registry Client: a stateless REST client over the external manifest and
//! domain registry, and (reusing the same request plumbing) the storage
//! service's chunk upload/download endpoints.
//!
//! A plain JSON-over-HTTP client built on `reqwest`, with error handling
//! and derive conventions matching the rest of the crate's `thiserror`-based
//! style.

use std::collections::HashMap;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("authentication failed")]
    Auth,
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("server error (status {status}): {body}")]
    Server { status: u16, body: String },
}

impl RegistryError {
    async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::CONFLICT => Self::Conflict(body),
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => Self::Validation(body),
            s if s.is_server_error() => Self::Server {
                status: s.as_u16(),
                body,
            },
            s => Self::Server {
                status: s.as_u16(),
                body,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub manifest_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: u64,
    pub chunk_size: u32,
    pub chunk_count: u32,
    pub whole_hash: String,
    pub chunk_hashes: Vec<String>,
    pub created_at: u64,
    #[serde(default)]
    pub chunk_data: Vec<Option<String>>,
    #[serde(default)]
    pub chunk_pointers: Vec<Option<String>>,
    #[serde(default)]
    pub chunk_replicas: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReplicaUpdate {
    pub peer_id: String,
    pub chunk_indexes: Vec<u32>,
    pub status: String,
    pub replicated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPointerUpdate {
    pub pointer: String,
    pub remove_data: bool,
    pub expires_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    pub owner: String,
    pub manifest_id: String,
    pub signature: String,
    pub public_key: String,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DomainBindingDiff {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

#[derive(Deserialize)]
struct DomainListResponse {
    domains: Vec<DomainRecord>,
}

#[derive(Serialize)]
struct StorageUploadBody<'a> {
    manifest_id: &'a str,
    chunk_index: u32,
    data: &'a str,
}

#[derive(Deserialize)]
struct StorageDownloadBody {
    data: String,
}

/// A REST client over a single base URL with a shared credential. Used both
/// for the registry and, with a different base URL, the storage service.
pub struct RegistryClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RegistryClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            api_key,
        }
    }

    fn headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder
                .header("X-API-Key", key)
                .header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(RegistryError::from_response(resp).await)
        }
    }

    pub async fn register_manifest(
        &self,
        record: &ManifestRecord,
    ) -> Result<ManifestRecord, RegistryError> {
        let req = self.headers(self.http.post(self.url("/manifests")).json(record));
        let resp = Self::check(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn get_manifest(&self, manifest_id: &str) -> Result<ManifestRecord, RegistryError> {
        let path = format!("/manifests/{manifest_id}");
        let req = self.headers(self.http.get(self.url(&path)));
        let resp = Self::check(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn update_chunk_replica(
        &self,
        manifest_id: &str,
        update: &ChunkReplicaUpdate,
    ) -> Result<(), RegistryError> {
        let path = format!("/manifests/{manifest_id}/replicas");
        let req = self.headers(self.http.patch(self.url(&path)).json(update));
        Self::check(req.send().await?).await?;
        Ok(())
    }

    pub async fn update_chunk_pointer(
        &self,
        manifest_id: &str,
        chunk_index: u32,
        update: &ChunkPointerUpdate,
    ) -> Result<(), RegistryError> {
        let path = format!("/manifests/{manifest_id}/chunks/{chunk_index}/pointer");
        let req = self.headers(self.http.patch(self.url(&path)).json(update));
        Self::check(req.send().await?).await?;
        Ok(())
    }

    pub async fn register_domain(&self, record: &DomainRecord) -> Result<(), RegistryError> {
        let req = self.headers(self.http.post(self.url("/domains")).json(record));
        Self::check(req.send().await?).await?;
        Ok(())
    }

    pub async fn update_domain_binding(
        &self,
        domain: &str,
        diff: &DomainBindingDiff,
    ) -> Result<(), RegistryError> {
        let path = format!("/domains/{domain}");
        let req = self.headers(self.http.patch(self.url(&path)).json(diff));
        Self::check(req.send().await?).await?;
        Ok(())
    }

    pub async fn delete_domain(&self, domain: &str) -> Result<(), RegistryError> {
        let path = format!("/domains/{domain}");
        let req = self.headers(self.http.delete(self.url(&path)));
        Self::check(req.send().await?).await?;
        Ok(())
    }

    pub async fn get_domain(&self, domain: &str) -> Result<Option<DomainRecord>, RegistryError> {
        let path = format!("/domains/{domain}");
        let req = self.headers(self.http.get(self.url(&path)));
        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        Ok(Some(resp.json().await?))
    }

    pub async fn list_domains(&self) -> Result<Vec<DomainRecord>, RegistryError> {
        let req = self.headers(self.http.get(self.url("/domains")));
        let resp = Self::check(req.send().await?).await?;
        let body: DomainListResponse = resp.json().await?;
        Ok(body.domains)
    }

    /// Storage service fallback upload: `POST /chunks`.
    pub async fn upload_chunk(
        &self,
        manifest_id: &str,
        chunk_index: u32,
        data_base64: &str,
    ) -> Result<(), RegistryError> {
        let body = StorageUploadBody {
            manifest_id,
            chunk_index,
            data: data_base64,
        };
        let req = self.headers(self.http.post(self.url("/chunks")).json(&body));
        Self::check(req.send().await?).await?;
        Ok(())
    }

    /// Storage service fallback download: `GET /chunks/{manifestId}/{index}`.
    pub async fn download_chunk(
        &self,
        manifest_id: &str,
        chunk_index: u32,
    ) -> Result<Vec<u8>, RegistryError> {
        let path = format!("/chunks/{manifest_id}/{chunk_index}");
        let req = self.headers(self.http.get(self.url(&path)));
        let resp = Self::check(req.send().await?).await?;
        let body: StorageDownloadBody = resp.json().await?;
        crate::hash::decode_payload(&body.data)
            .map_err(|e| RegistryError::Validation(e.to_string()))
    }
}

/// Builds the `storageBase + "/chunks/" + manifestId + "/" + chunkIndex`
/// pointer used by the storage fallback path.
pub fn storage_pointer(storage_base: &str, manifest_id: &str, chunk_index: u32) -> String {
    format!(
        "{}/chunks/{}/{}",
        storage_base.trim_end_matches('/'),
        manifest_id,
        chunk_index
    )
}

/// `HashMap` alias used where the registry view tracks per-chunk pointer
/// presence for the retriever; kept here since both `registry` and
/// `retriever` need the same shape without a circular module dependency.
pub type ChunkPointerMap = HashMap<u32, String>;
