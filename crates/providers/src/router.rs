//! Provider router — builds the chat and embedding providers from config.
//!
//! The chat provider is always a [`FallbackProvider`]: the configured model
//! first, then each fallback model against the same endpoint. Embeddings go
//! to their own endpoint when one is configured, otherwise to the chat one.

use crate::fallback::FallbackProvider;
use crate::openai_compat::OpenAiCompatProvider;
use procura_config::AppConfig;
use procura_core::provider::Provider;
use std::sync::Arc;
use std::time::Duration;

/// The providers a conversation engine needs.
#[derive(Clone)]
pub struct ProviderSet {
    /// Chat completions (with fallback chain).
    pub chat: Arc<dyn Provider>,
    /// Embeddings.
    pub embedding: Arc<dyn Provider>,
    /// Primary chat model name.
    pub model: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Requested embedding dimensions.
    pub dimensions: usize,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("chat", &self.chat.name())
            .field("embedding", &self.embedding.name())
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &AppConfig) -> ProviderSet {
    let llm = &config.llm;
    let timeout = Duration::from_secs(llm.timeout_secs);
    let base_url = resolve_base_url(&llm.provider, &llm.api_url);
    let api_key = llm.api_key.clone().unwrap_or_default();

    let endpoint: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::with_timeout(
        &llm.provider,
        &base_url,
        &api_key,
        timeout,
    ));

    let mut chain = FallbackProvider::new(format!("{}-chain", llm.provider))
        .add_with_model(endpoint.clone(), &llm.model, timeout);
    for model in &llm.fallback_models {
        chain = chain.add_with_model(endpoint.clone(), model, timeout);
    }

    let embed = &config.embedding;
    let embedding: Arc<dyn Provider> = match &embed.api_url {
        Some(url) => Arc::new(OpenAiCompatProvider::with_timeout(
            "embedding",
            url,
            embed.api_key.clone().unwrap_or_else(|| api_key.clone()),
            timeout,
        )),
        None if embed.api_key.is_some() => Arc::new(OpenAiCompatProvider::with_timeout(
            "embedding",
            &base_url,
            embed.api_key.clone().unwrap_or_default(),
            timeout,
        )),
        None => endpoint,
    };

    ProviderSet {
        chat: Arc::new(chain),
        embedding,
        model: llm.model.clone(),
        embedding_model: embed.model.clone(),
        dimensions: embed.dimensions,
    }
}

/// The configured URL, unless it is the stock OpenAI one and the provider
/// names another well-known backend.
fn resolve_base_url(provider: &str, api_url: &str) -> String {
    let stock = default_base_url("openai");
    if api_url.trim_end_matches('/') == stock && provider != "openai" {
        return default_base_url(provider);
    }
    api_url.trim_end_matches('/').to_string()
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => "https://api.openai.com/v1".into(),
    }
}
