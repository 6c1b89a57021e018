pub mod ask;
pub mod chat;
pub mod check_query;
pub mod config_cmd;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use procura_config::AppConfig;
use procura_engine::Engine;
use procura_graph::Neo4jHttpStore;

/// The config file in use: `--config`, else the default location.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load the config file, then environment overrides, then validate.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_from(&config_file(explicit))
        .map_err(|e| format!("Failed to load config: {e}"))?;
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Providers and graph wired from configuration.
pub fn build_engine(config: &AppConfig) -> Result<Engine, Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    PROCURA_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY  = 'sk-...'");
        eprintln!();
        eprintln!("  Or add llm.api_key to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let providers = procura_providers::build_from_config(config);
    tracing::debug!(?providers, "Providers ready");
    let graph = Arc::new(Neo4jHttpStore::from_config(&config.graph, &config.retrieval));
    tracing::debug!(endpoint = graph.endpoint(), "Graph store ready");
    Ok(Engine::new(providers, graph, config.clone()))
}
