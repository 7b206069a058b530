use clap::Subcommand;

use crate::identity;

#[derive(Subcommand)]
pub enum IdentityCommand {
    /// Generate a new Ed25519 identity and persist it to the local identity store
    Create,
    /// Show the owner id and public key of the stored identity, if any
    Show,
}

fn identity_dir() -> std::path::PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dweb-hosting-bot")
        .join("identity")
}

pub async fn execute(action: IdentityCommand) -> Result<(), Box<dyn std::error::Error>> {
    let dir = identity_dir();
    match action {
        IdentityCommand::Create => {
            let id = identity::create_identity()?;
            identity::store(&dir, &id)?;
            println!("Created identity {}", id.owner_id());
            println!("Stored under {}", dir.display());
        }
        IdentityCommand::Show => {
            let identities = identity::list(&dir)?;
            if identities.is_empty() {
                println!("no identities found under {}", dir.display());
            }
            for id in identities {
                println!("{}", id.owner_id());
            }
        }
    }
    Ok(())
}
