use std::path::Path;
use std::sync::Arc;

use clap::Subcommand;

use crate::chunk_store::InMemoryChunkStore;
use crate::config::EngineConfig;
use crate::identity;
use crate::publication::PublicationController;
use crate::registry::RegistryClient;

#[derive(Subcommand)]
pub enum DomainCommand {
    /// Bind (or rebind) a domain to a manifest, signed by the local identity
    Bind {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        manifest_id: String,
    },
    /// Show the current binding for a domain
    Show {
        #[arg(long)]
        domain: String,
    },
}

fn identity_dir() -> std::path::PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dweb-hosting-bot")
        .join("identity")
}

pub async fn execute(config_path: Option<String>, action: DomainCommand) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load(config_path.as_deref().map(Path::new), Default::default())?;
    let registry = Arc::new(RegistryClient::new(config.registry_base_url.clone(), config.registry_api_key.clone()));

    match action {
        DomainCommand::Bind { domain, manifest_id } => {
            let identities = identity::list(&identity_dir())?;
            let id = identities
                .into_iter()
                .next()
                .ok_or("no local identity found; run `dwebctl identity create` first")?;

            let store = Arc::new(InMemoryChunkStore::new());
            let controller = PublicationController::new(config.clone(), registry, store);
            controller.bind_domain(&id, &domain, &manifest_id).await?;
            println!("Bound {domain} -> {manifest_id} as {}", id.owner_id());
        }
        DomainCommand::Show { domain } => match registry.get_domain(&domain).await? {
            Some(record) => {
                println!("{} -> {}", record.domain, record.manifest_id);
                println!("  owner: {}", record.owner);
                println!("  updated at: {}", record.updated_at);
            }
            None => println!("{domain} is not bound"),
        },
    }
    Ok(())
}
