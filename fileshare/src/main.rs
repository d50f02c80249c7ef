mod server;

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use fileshare_api::http::AppState;
use fileshare_core::{
    identity::StaticIdentityProvider,
    logging,
    progress::RegistryConfig,
    storage::LocalDirStore,
    Config, ConnectionRegistry,
};

use server::FileShareServer;

#[derive(Debug, Parser)]
#[command(name = "fileshare", version, about = "File upload server with live progress notifications")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "FILESHARE_CONFIG_PATH")]
    config: Option<String>,
}

/// Config file path: flag or env var > CWD
fn resolve_config_path(cli: &Cli) -> Option<String> {
    cli.config.clone().or_else(|| {
        let cwd = "config.yaml";
        Path::new(cwd).exists().then(|| cwd.to_string())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config_path = resolve_config_path(&cli);
    if let Some(path) = &config_path {
        eprintln!("Loading config from {path}");
    }
    let config = Config::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("File share server starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Collaborators
    let store = LocalDirStore::new(&config.storage.upload_dir).await?;
    info!("Storing uploads in {}", store.root().display());
    let identity = StaticIdentityProvider::from_config(&config.auth);
    if config.auth.allow_anonymous {
        info!("Anonymous uploads are enabled");
    }

    // 5. Progress notification registry
    let registry = ConnectionRegistry::new(RegistryConfig::from(&config.progress));
    let state = AppState::new(&config, registry.clone(), Arc::new(store), Arc::new(identity));

    // 6. Serve until shutdown
    FileShareServer::new(config, registry, state).start().await
}
