use std::path::Path;

use crate::config::EngineConfig;
use crate::registry::RegistryClient;

/// Shows the registry's view of a manifest: chunk count, replica status per
/// chunk, and whether every chunk has at least one durable copy (a peer
/// replica or a storage pointer).
pub async fn execute(config_path: Option<String>, manifest_id: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load(config_path.as_deref().map(Path::new), Default::default())?;
    let registry = RegistryClient::new(config.registry_base_url.clone(), config.registry_api_key.clone());

    let record = registry.get_manifest(&manifest_id).await?;
    println!("Manifest {}", record.manifest_id);
    println!("  file: {} ({})", record.file_name, record.mime_type);
    println!("  size: {} byte(s) across {} chunk(s)", record.file_size, record.chunk_count);

    let mut durable = 0u32;
    for i in 0..record.chunk_count as usize {
        let has_replica = record.chunk_replicas.get(i).map(|r| !r.is_empty()).unwrap_or(false);
        let has_pointer = record.chunk_pointers.get(i).map(|p| p.is_some()).unwrap_or(false);
        if has_replica || has_pointer {
            durable += 1;
        }
    }
    println!("  durable chunks: {}/{}", durable, record.chunk_count);

    Ok(())
}
