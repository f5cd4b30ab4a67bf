// src/main.rs — Sparrow entry point

use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use sparrow::backend::generation::GenerationClient;
use sparrow::backend::local::LocalBackend;
use sparrow::backend::store::SessionStore;
use sparrow::chat::subscription::TokenChannel;
use sparrow::cli::{Cli, Commands};
use sparrow::infra::config::Config;
use sparrow::infra::{logger, paths};

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG / SPARROW_LOG)
    logger::init_logging("warn");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let mut config = if let Some(ref path) = cli.config {
        Config::load_from(Path::new(path))?
    } else {
        Config::load()?
    };
    if let Some(model) = cli.model {
        config.server.model = Some(model);
    }

    paths::ensure_dirs()?;
    let store = SessionStore::open(&paths::db_path())?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Sessions { action } => sparrow::cli::sessions::run_sessions(action, &store),
        Commands::Chat => {
            let channel = TokenChannel::new(config.stream.channel_capacity);
            let generator = GenerationClient::new(config.server.base_url.clone(), channel.clone());
            let backend = Arc::new(LocalBackend::new(
                store,
                generator,
                config.server.model.clone(),
            ));
            sparrow::cli::chat::run_chat(backend, channel, &config).await
        }
    }
}
