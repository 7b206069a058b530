use clap::{Parser, Subcommand};

pub mod domain;
pub mod fetch;
pub mod identity;
pub mod publish;
pub mod status;

#[derive(Parser)]
#[command(name = "dwebctl")]
#[command(author = "dweb-hosting-bot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the decentralized content-replication engine", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file (default layer precedence: defaults < file < env < flags)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the local signing identity
    Identity {
        #[command(subcommand)]
        action: identity::IdentityCommand,
    },

    /// Publish a local file: build its manifest, register it, and replicate
    /// it to the configured number of peers
    Publish {
        /// Path to the file to publish
        #[arg(long)]
        file: String,

        /// Manifest MIME type (guessed from the extension if omitted)
        #[arg(long)]
        mime_type: Option<String>,

        /// Domain to bind once replication quorum is reached
        #[arg(long)]
        domain: Option<String>,
    },

    /// Show replication and quorum status for a manifest
    Status {
        /// Manifest id to check
        #[arg(long)]
        manifest_id: String,
    },

    /// Manage domain bindings
    Domain {
        #[command(subcommand)]
        action: domain::DomainCommand,
    },

    /// Retrieve a chunk or an entire file by manifest id
    Fetch {
        /// Manifest id to retrieve
        #[arg(long)]
        manifest_id: String,

        /// Output file path
        #[arg(long)]
        output: String,
    },
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Identity { action } => identity::execute(action).await,
        Commands::Publish {
            file,
            mime_type,
            domain,
        } => publish::execute(cli.config, file, mime_type, domain).await,
        Commands::Status { manifest_id } => status::execute(cli.config, manifest_id).await,
        Commands::Domain { action } => domain::execute(cli.config, action).await,
        Commands::Fetch { manifest_id, output } => fetch::execute(cli.config, manifest_id, output).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identity_create() {
        let cli = Cli::parse_from(["dwebctl", "identity", "create"]);
        match cli.command {
            Commands::Identity {
                action: identity::IdentityCommand::Create,
            } => {}
            _ => panic!("expected Identity Create command"),
        }
    }

    #[test]
    fn parses_publish_with_domain() {
        let cli = Cli::parse_from([
            "dwebctl",
            "publish",
            "--file",
            "/tmp/site.html",
            "--domain",
            "example.dweb",
        ]);
        match cli.command {
            Commands::Publish { file, domain, .. } => {
                assert_eq!(file, "/tmp/site.html");
                assert_eq!(domain, Some("example.dweb".to_string()));
            }
            _ => panic!("expected Publish command"),
        }
    }

    #[test]
    fn parses_status() {
        let cli = Cli::parse_from(["dwebctl", "status", "--manifest-id", "m1"]);
        match cli.command {
            Commands::Status { manifest_id } => assert_eq!(manifest_id, "m1"),
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn parses_domain_bind() {
        let cli = Cli::parse_from([
            "dwebctl",
            "domain",
            "bind",
            "--domain",
            "example.dweb",
            "--manifest-id",
            "m1",
        ]);
        match cli.command {
            Commands::Domain {
                action: domain::DomainCommand::Bind { domain, manifest_id },
            } => {
                assert_eq!(domain, "example.dweb");
                assert_eq!(manifest_id, "m1");
            }
            _ => panic!("expected Domain Bind command"),
        }
    }

    #[test]
    fn parses_fetch() {
        let cli = Cli::parse_from([
            "dwebctl",
            "fetch",
            "--manifest-id",
            "m1",
            "--output",
            "/tmp/out.bin",
        ]);
        match cli.command {
            Commands::Fetch { manifest_id, output } => {
                assert_eq!(manifest_id, "m1");
                assert_eq!(output, "/tmp/out.bin");
            }
            _ => panic!("expected Fetch command"),
        }
    }

    #[test]
    fn global_config_flag_is_visible_to_every_subcommand() {
        let cli = Cli::parse_from(["dwebctl", "--config", "/etc/dweb/config.toml", "status", "--manifest-id", "m1"]);
        assert_eq!(cli.config, Some("/etc/dweb/config.toml".to_string()));
    }
}
