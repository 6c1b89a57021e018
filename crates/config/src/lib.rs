//! Configuration loading, validation, and management for procura.
//!
//! Loads configuration from `~/.procura/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.procura/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat model endpoint
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding endpoint
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Knowledge graph connection
    #[serde(default)]
    pub graph: GraphConfig,

    /// Per-tier retrieval caps
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Context window accounting
    #[serde(default)]
    pub context: ContextConfig,

    /// Conversation memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Query planning and result presentation
    #[serde(default)]
    pub query: QueryConfig,

    /// Document drafting
    #[serde(default)]
    pub draft: DraftConfig,

    /// Follow-up suggestions
    #[serde(default)]
    pub followups: FollowupConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    #[serde(default = "default_llm_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Models tried in order after the primary fails or times out.
    #[serde(default)]
    pub fallback_models: Vec<String>,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_frequency_penalty")]
    pub frequency_penalty: f32,

    #[serde(default = "default_presence_penalty")]
    pub presence_penalty: f32,
}

fn default_llm_provider() -> String {
    "openai".into()
}
fn default_llm_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_frequency_penalty() -> f32 {
    0.3
}
fn default_presence_penalty() -> f32 {
    0.2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_url: default_llm_url(),
            api_key: None,
            model: default_model(),
            fallback_models: Vec::new(),
            timeout_secs: default_llm_timeout(),
            frequency_penalty: default_frequency_penalty(),
            presence_penalty: default_presence_penalty(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("fallback_models", &self.fallback_models)
            .field("timeout_secs", &self.timeout_secs)
            .field("frequency_penalty", &self.frequency_penalty)
            .field("presence_penalty", &self.presence_penalty)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Defaults to the chat endpoint when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_embed_max_chars")]
    pub max_input_chars: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_dimensions() -> usize {
    1024
}
fn default_embed_max_chars() -> usize {
    4000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            max_input_chars: default_embed_max_chars(),
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("max_input_chars", &self.max_input_chars)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_url")]
    pub url: String,

    #[serde(default = "default_graph_database")]
    pub database: String,

    #[serde(default = "default_graph_user")]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_graph_timeout")]
    pub timeout_secs: u64,
}

fn default_graph_url() -> String {
    "http://localhost:7474".into()
}
fn default_graph_database() -> String {
    "neo4j".into()
}
fn default_graph_user() -> String {
    "neo4j".into()
}
fn default_graph_timeout() -> u64 {
    30
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: default_graph_url(),
            database: default_graph_database(),
            user: default_graph_user(),
            password: None,
            timeout_secs: default_graph_timeout(),
        }
    }
}

impl std::fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_k_contracts")]
    pub k_contracts: usize,

    #[serde(default = "default_k_chapters")]
    pub k_chapters: usize,

    #[serde(default = "default_k_excerpts")]
    pub k_excerpts: usize,

    /// Max rows returned by a case-file lookup.
    #[serde(default = "default_lookup_limit")]
    pub lookup_limit: usize,

    /// Max contracts returned for a tax id.
    #[serde(default = "default_tax_id_limit")]
    pub tax_id_limit: usize,
}

fn default_k_contracts() -> usize {
    5
}
fn default_k_chapters() -> usize {
    25
}
fn default_k_excerpts() -> usize {
    50
}
fn default_lookup_limit() -> usize {
    5
}
fn default_tax_id_limit() -> usize {
    20
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_contracts: default_k_contracts(),
            k_chapters: default_k_chapters(),
            k_excerpts: default_k_excerpts(),
            lookup_limit: default_lookup_limit(),
            tax_id_limit: default_tax_id_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Total model context window.
    #[serde(default = "default_model_max_tokens")]
    pub model_max_tokens: usize,

    /// Tokens kept free for the answer itself.
    #[serde(default = "default_reserve_tokens")]
    pub reserve_for_answer_tokens: usize,

    /// Allowance for retrieved evidence, on top of the answer reserve.
    #[serde(default = "default_retrieval_max_tokens")]
    pub retrieval_max_tokens: usize,
}

fn default_model_max_tokens() -> usize {
    30_000
}
fn default_reserve_tokens() -> usize {
    6_000
}
fn default_retrieval_max_tokens() -> usize {
    12_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            model_max_tokens: default_model_max_tokens(),
            reserve_for_answer_tokens: default_reserve_tokens(),
            retrieval_max_tokens: default_retrieval_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Compaction triggers when the stored turn count exceeds this.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Turns kept verbatim after compaction.
    #[serde(default = "default_tail_window")]
    pub tail_window: usize,

    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,

    /// Questions up to this length that refer back to the previous turn
    /// reuse its intent without classification.
    #[serde(default = "default_followup_reuse_max_chars")]
    pub followup_reuse_max_chars: usize,
}

fn default_max_history_turns() -> usize {
    12
}
fn default_tail_window() -> usize {
    6
}
fn default_summary_max_tokens() -> u32 {
    1500
}
fn default_followup_reuse_max_chars() -> usize {
    160
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_history_turns: default_max_history_turns(),
            tail_window: default_tail_window(),
            summary_max_tokens: default_summary_max_tokens(),
            followup_reuse_max_chars: default_followup_reuse_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_max_repairs")]
    pub max_repairs: u32,

    /// LIMIT appended to queries that have none.
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,

    #[serde(default = "default_table_max_rows")]
    pub table_max_rows: usize,

    #[serde(default = "default_table_max_cols")]
    pub table_max_cols: usize,

    /// Above this many rows the explanation call is skipped.
    #[serde(default = "default_explain_max_rows")]
    pub explain_max_rows: usize,
}

fn default_max_repairs() -> u32 {
    2
}
fn default_query_limit() -> usize {
    50
}
fn default_table_max_rows() -> usize {
    10
}
fn default_table_max_cols() -> usize {
    8
}
fn default_explain_max_rows() -> usize {
    15
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_repairs: default_max_repairs(),
            default_limit: default_query_limit(),
            table_max_rows: default_table_max_rows(),
            table_max_cols: default_table_max_cols(),
            explain_max_rows: default_explain_max_rows(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftConfig {
    #[serde(default = "default_max_reference_chapters")]
    pub max_reference_chapters: usize,

    #[serde(default = "default_chapter_clip_chars")]
    pub chapter_clip_chars: usize,

    #[serde(default = "default_chapter_max_tokens")]
    pub chapter_max_tokens: u32,
}

fn default_max_reference_chapters() -> usize {
    18
}
fn default_chapter_clip_chars() -> usize {
    1200
}
fn default_chapter_max_tokens() -> u32 {
    900
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            max_reference_chapters: default_max_reference_chapters(),
            chapter_clip_chars: default_chapter_clip_chars(),
            chapter_max_tokens: default_chapter_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,

    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,

    #[serde(default = "default_label_max_chars")]
    pub label_max_chars: usize,
}

fn default_true() -> bool {
    true
}
fn default_min_answer_chars() -> usize {
    200
}
fn default_max_suggestions() -> usize {
    3
}
fn default_label_max_chars() -> usize {
    100
}

impl Default for FollowupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_answer_chars: default_min_answer_chars(),
            max_suggestions: default_max_suggestions(),
            label_max_chars: default_label_max_chars(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.procura/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `PROCURA_API_KEY`, then `OPENAI_API_KEY`
    /// - `PROCURA_MODEL`, `PROCURA_LLM_URL`, `PROCURA_EMBEDDING_URL`
    /// - `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD`
    /// - `PROCURA_MAX_HISTORY_TURNS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("PROCURA_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("PROCURA_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("PROCURA_LLM_URL") {
            self.llm.api_url = url;
        }
        if let Some(url) = lookup("PROCURA_EMBEDDING_URL") {
            self.embedding.api_url = Some(url);
        }
        if let Some(uri) = lookup("NEO4J_URI") {
            self.graph.url = uri;
        }
        if let Some(user) = lookup("NEO4J_USER") {
            self.graph.user = user;
        }
        if let Some(password) = lookup("NEO4J_PASSWORD") {
            self.graph.password = Some(password);
        }
        if let Some(turns) = lookup("PROCURA_MAX_HISTORY_TURNS") {
            match turns.parse() {
                Ok(n) => self.memory.max_history_turns = n,
                Err(_) => tracing::warn!(value = %turns, "Ignoring invalid PROCURA_MAX_HISTORY_TURNS"),
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".procura")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.tail_window >= self.memory.max_history_turns {
            return Err(ConfigError::ValidationError(format!(
                "memory.tail_window ({}) must be smaller than memory.max_history_turns ({})",
                self.memory.tail_window, self.memory.max_history_turns
            )));
        }

        if self.context.reserve_for_answer_tokens >= self.context.model_max_tokens {
            return Err(ConfigError::ValidationError(
                "context.reserve_for_answer_tokens must be below context.model_max_tokens".into(),
            ));
        }

        if self.context.retrieval_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.retrieval_max_tokens must be > 0".into(),
            ));
        }

        let needed = self
            .context
            .retrieval_max_tokens
            .saturating_add(self.context.reserve_for_answer_tokens);
        if needed > self.context.model_max_tokens {
            return Err(ConfigError::ValidationError(format!(
                "context.retrieval_max_tokens + context.reserve_for_answer_tokens ({needed}) \
                 cannot exceed context.model_max_tokens ({})",
                self.context.model_max_tokens
            )));
        }

        if self.retrieval.k_contracts == 0
            || self.retrieval.k_chapters == 0
            || self.retrieval.k_excerpts == 0
        {
            return Err(ConfigError::ValidationError(
                "retrieval caps (k_contracts, k_chapters, k_excerpts) must be > 0".into(),
            ));
        }

        if self.query.max_repairs > 5 {
            return Err(ConfigError::ValidationError(
                "query.max_repairs must be at most 5".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.k_contracts, 5);
        assert_eq!(config.retrieval.k_chapters, 25);
        assert_eq!(config.retrieval.k_excerpts, 50);
        assert_eq!(config.memory.max_history_turns, 12);
        assert_eq!(config.context.model_max_tokens, 30_000);
        assert_eq!(config.context.reserve_for_answer_tokens, 6_000);
        assert_eq!(config.context.retrieval_max_tokens, 12_000);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.memory.tail_window, config.memory.tail_window);
    }

    #[test]
    fn tail_window_must_be_below_threshold() {
        let mut config = AppConfig::default();
        config.memory.tail_window = 12;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tail_window"));
    }

    #[test]
    fn reserve_must_fit_in_window() {
        let mut config = AppConfig::default();
        config.context.reserve_for_answer_tokens = 40_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn evidence_and_reserve_must_fit_in_window() {
        let mut config = AppConfig::default();
        config.context.retrieval_max_tokens = 25_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retrieval_max_tokens"));

        config.context.retrieval_max_tokens = 0;
        assert!(config.validate().is_err());

        // A reserve larger than the evidence allowance is fine.
        config.context.retrieval_max_tokens = 5_000;
        config.context.reserve_for_answer_tokens = 8_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_k_rejected() {
        let mut config = AppConfig::default();
        config.retrieval.k_chapters = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().llm.provider, "openai");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[retrieval]
k_contracts = 8

[memory]
max_history_turns = 20
tail_window = 10
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.retrieval.k_contracts, 8);
        assert_eq!(config.retrieval.k_chapters, 25);
        assert_eq!(config.memory.max_history_turns, 20);
        assert_eq!(config.memory.tail_window, 10);
    }

    #[test]
    fn invalid_file_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[memory]\nmax_history_turns = 4\ntail_window = 4\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retrieval\nk_contracts = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("PROCURA_MODEL", "gpt-4.1"),
            ("NEO4J_URI", "http://graph:7474"),
            ("NEO4J_PASSWORD", "secret"),
            ("PROCURA_MAX_HISTORY_TURNS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model, "gpt-4.1");
        assert_eq!(config.graph.url, "http://graph:7474");
        assert_eq!(config.graph.password.as_deref(), Some("secret"));
        assert_eq!(config.memory.max_history_turns, 12);
    }

    #[test]
    fn file_key_wins_over_env_key() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("from-file".into());
        config.apply_env(|k| (k == "OPENAI_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.llm.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-very-secret".into());
        config.graph.password = Some("hunter2".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("k_contracts"));
        assert!(toml_str.contains("30000"));
    }
}
