//! `procura config` — Configuration management commands.

use std::fmt::Display;
use std::future::Future;
use std::path::Path;

use procura_config::AppConfig;
use procura_core::{GraphStore, Provider};
use procura_graph::Neo4jHttpStore;

const REDACTED: &str = "***";

/// Print one connectivity check and report whether it passed.
async fn check<E: Display>(label: &str, ping: impl Future<Output = Result<bool, E>>) -> bool {
    match ping.await {
        Ok(true) => {
            println!("   ✅ {label} reachable");
            true
        }
        Ok(false) => {
            println!("   ❌ {label} answered but is not healthy");
            false
        }
        Err(e) => {
            println!("   ❌ {label} unreachable: {e}");
            false
        }
    }
}

/// Ping the chat model, the embedding endpoint and the graph.
async fn check_connections(config: &AppConfig) -> bool {
    println!();
    println!("🔌 Checking connections...");
    let mut healthy = true;
    if config.has_api_key() {
        let providers = procura_providers::build_from_config(config);
        healthy &= check("Chat model", providers.chat.health_check()).await;
        healthy &= check("Embeddings", providers.embedding.health_check()).await;
    } else {
        println!("   ⏭  Model checks skipped (no API key)");
    }
    let graph = Neo4jHttpStore::from_config(&config.graph, &config.retrieval);
    healthy &= check("Graph", graph.health_check()).await;
    healthy
}

pub async fn validate(config_path: Option<&Path>, connect: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set PROCURA_API_KEY or OPENAI_API_KEY)");
    }
    if config.graph.password.is_none() {
        warnings.push("No graph password set (NEO4J_PASSWORD)");
    }
    if config.embedding.dimensions == 0 {
        warnings.push("embedding.dimensions is 0; similarity search will fail");
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Model:      {}", config.llm.model);
    println!("   Fallbacks:  {}", config.llm.fallback_models.join(", "));
    println!("   Embedding:  {} ({} dims)", config.embedding.model, config.embedding.dimensions);
    println!("   Graph:      {} / {}", config.graph.url, config.graph.database);
    println!(
        "   Context:    {} max, {} retrieval, {} reserved",
        config.context.model_max_tokens,
        config.context.retrieval_max_tokens,
        config.context.reserve_for_answer_tokens
    );

    if connect && !check_connections(&config).await {
        return Err("One or more services are unreachable".into());
    }
    Ok(())
}

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some(REDACTED.into());
    }
    if config.embedding.api_key.is_some() {
        config.embedding.api_key = Some(REDACTED.into());
    }
    if config.graph.password.is_some() {
        config.graph.password = Some(REDACTED.into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", super::config_file(config_path).display());
}

pub fn init(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = super::config_file(config_path);
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Wrote {}", path.display());
    Ok(())
}
