use std::path::Path;
use std::sync::Arc;

use crate::chunk_store::InMemoryChunkStore;
use crate::config::EngineConfig;
use crate::publication::PublicationController;
use crate::registry::RegistryClient;

/// Publishes a local file: builds its manifest, registers it with the
/// configured registry, and caches every chunk on the origin.
///
/// Peer discovery and live session wiring are an external collaborator not
/// modeled by this CLI (see PURPOSE & SCOPE): publishing from the command
/// line registers the manifest and leaves it at zero replicas, ready for a
/// long-running engine process to pick up and replicate.
pub async fn execute(
    config_path: Option<String>,
    file: String,
    mime_type: Option<String>,
    domain: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load(config_path.as_deref().map(Path::new), Default::default())?;
    let bytes = std::fs::read(&file)?;
    let file_name = Path::new(&file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.clone());
    let mime_type = mime_type.unwrap_or_else(|| "application/octet-stream".to_string());
    let manifest_id = crate::hash::digest(&bytes);

    let registry = Arc::new(RegistryClient::new(config.registry_base_url.clone(), config.registry_api_key.clone()));
    let store = Arc::new(InMemoryChunkStore::new());
    let controller = PublicationController::new(config, registry, store);

    let outcome = controller
        .publish(manifest_id.clone(), file_name, mime_type, bytes, vec![])
        .await?;

    println!("Published manifest {}", outcome.manifest.manifest_id);
    println!("  {} chunk(s), {} byte(s)", outcome.manifest.chunk_count, outcome.manifest.file_size);
    println!("  quorum met: {}", outcome.quorum_met);

    if let Some(domain) = domain {
        if !outcome.quorum_met {
            println!("domain bind skipped: replication quorum not yet satisfied for {}", outcome.manifest.manifest_id);
        } else {
            println!("domain bind for {domain} requires a local identity; run `dwebctl domain bind` once one exists");
        }
    }

    Ok(())
}
