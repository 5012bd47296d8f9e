//! TOML configuration parsing and validation.
//!
//! ```toml
//! [store]
//! backend = "sheets"            # or "memory"
//!
//! [memory]
//! document = "https://docs.google.com/spreadsheets/d/<memory-id>/edit"
//! schema = "sessioned"          # or "single"
//!
//! [source_map]
//! document = "https://docs.google.com/spreadsheets/d/<master-id>/edit"
//! table = "AI_LINKS"
//! cross_cutting_project = "Inventory"
//!
//! [internal_tasks]
//! document = "https://docs.google.com/spreadsheets/d/<tasks-id>/edit"
//!
//! [context]
//! max_rows_per_table = 100
//! excluded_table_names = ["Instructions", "Admin"]
//!
//! [model]
//! provider = "gemini"
//! model = "gemini-2.0-flash"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::TableRef;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    pub memory: MemoryConfig,
    pub source_map: SourceMapConfig,
    #[serde(default)]
    pub internal_tasks: Option<InternalTasksConfig>,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sheets,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// JSON seed for the memory backend.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            timeout_secs: default_store_timeout(),
            api_base: default_api_base(),
            token_env: default_token_env(),
            seed_path: None,
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sheets
}
fn default_store_timeout() -> u64 {
    20
}
fn default_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}
fn default_token_env() -> String {
    "GOOGLE_SHEETS_TOKEN".to_string()
}

/// Conversation record layout.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistorySchema {
    /// `Session_ID, Role, Content, Timestamp`
    Sessioned,
    /// `Role, Content, Timestamp`; one conversation per store.
    Single,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    pub document: String,
    /// Table name; the first table when unset.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: HistorySchema,
}

fn default_schema() -> HistorySchema {
    HistorySchema::Sessioned
}

impl MemoryConfig {
    pub fn table_ref(&self) -> TableRef {
        match &self.table {
            Some(name) => TableRef::Name(name.clone()),
            None => TableRef::Index(0),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceMapConfig {
    pub document: String,
    #[serde(default = "default_links_table")]
    pub table: String,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Project whose entries are appended to every lexical project match.
    #[serde(default)]
    pub cross_cutting_project: Option<String>,
}

fn default_links_table() -> String {
    "AI_LINKS".to_string()
}
fn default_cache_ttl() -> u64 {
    600
}

impl SourceMapConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InternalTasksConfig {
    pub document: String,
    #[serde(default = "default_internal_label")]
    pub label: String,
}

fn default_internal_label() -> String {
    "Internal Tasks".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows_per_table: usize,
    #[serde(default = "default_excluded_tables")]
    pub excluded_table_names: Vec<String>,
    /// Prior user/assistant exchanges shown to the model.
    #[serde(default = "default_recent_turns")]
    pub recent_context_turns: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_rows_per_table: default_max_rows(),
            excluded_table_names: default_excluded_tables(),
            recent_context_turns: default_recent_turns(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_max_rows() -> usize {
    100
}
fn default_excluded_tables() -> Vec<String> {
    vec!["Instructions".to_string(), "Admin".to_string()]
}
fn default_recent_turns() -> usize {
    3
}
fn default_max_context_chars() -> usize {
    120_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    /// Overrides the provider's default API key variable.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            timeout_secs: default_model_timeout(),
            api_key_env: None,
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model_timeout() -> u64 {
    60
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            list_limit: default_list_limit(),
        }
    }
}

fn default_list_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// An all-in-memory configuration with default limits.
    ///
    /// Memory history lives in document `memory`, the source map in
    /// document `master`; no internal task document is configured.
    pub fn minimal() -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackend::Memory,
                ..StoreConfig::default()
            },
            memory: MemoryConfig {
                document: "memory".to_string(),
                table: None,
                schema: HistorySchema::Sessioned,
            },
            source_map: SourceMapConfig {
                document: "master".to_string(),
                table: default_links_table(),
                cache_ttl_secs: 0,
                cross_cutting_project: None,
            },
            internal_tasks: None,
            context: ContextConfig::default(),
            model: ModelConfig::default(),
            sessions: SessionsConfig::default(),
            server: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.memory.document.trim().is_empty() {
        anyhow::bail!("memory.document must not be empty");
    }
    if config.source_map.document.trim().is_empty() {
        anyhow::bail!("source_map.document must not be empty");
    }
    if let Some(internal) = &config.internal_tasks {
        if internal.document.trim().is_empty() {
            anyhow::bail!("internal_tasks.document must not be empty");
        }
    }

    if config.context.max_rows_per_table == 0 {
        anyhow::bail!("context.max_rows_per_table must be > 0");
    }
    if config.context.max_context_chars == 0 {
        anyhow::bail!("context.max_context_chars must be > 0");
    }
    if config.sessions.list_limit == 0 {
        anyhow::bail!("sessions.list_limit must be >= 1");
    }
    if config.store.timeout_secs == 0 || config.model.timeout_secs == 0 {
        anyhow::bail!("timeout_secs must be > 0");
    }

    match config.model.provider.as_str() {
        "disabled" => {}
        "gemini" | "openai" | "ollama" => {
            if config.model.model.is_none() {
                anyhow::bail!(
                    "model.model must be specified when provider is '{}'",
                    config.model.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled, gemini, openai, or ollama.",
            other
        ),
    }

    if config.store.backend == StoreBackend::Memory && config.store.seed_path.is_none() {
        tracing::debug!("memory backend without seed_path: starting with empty documents");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[memory]
document = "https://docs.google.com/spreadsheets/d/mem/edit"

[source_map]
document = "https://docs.google.com/spreadsheets/d/master/edit"
cross_cutting_project = "Inventory"

[internal_tasks]
document = "tasks"

[context]
max_rows_per_table = 50

[model]
provider = "gemini"
model = "gemini-2.0-flash"
"#;

    #[test]
    fn parses_with_defaults() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.store.backend, StoreBackend::Sheets);
        assert_eq!(cfg.memory.schema, HistorySchema::Sessioned);
        assert_eq!(cfg.memory.table_ref(), TableRef::Index(0));
        assert_eq!(cfg.source_map.table, "AI_LINKS");
        assert_eq!(cfg.source_map.cache_ttl(), Duration::from_secs(600));
        assert_eq!(cfg.context.max_rows_per_table, 50);
        assert_eq!(cfg.context.recent_context_turns, 3);
        assert_eq!(cfg.context.excluded_table_names, vec!["Instructions", "Admin"]);
        assert_eq!(cfg.internal_tasks.unwrap().label, "Internal Tasks");
        assert_eq!(cfg.sessions.list_limit, 10);
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.model.provider = "palm".into();
        let err = validate(&cfg).unwrap_err().to_string();
        assert!(err.contains("Unknown model provider"));
    }

    #[test]
    fn rejects_provider_without_model() {
        let mut cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.model.model = None;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_zero_row_cap() {
        let mut cfg = Config::minimal();
        cfg.context.max_rows_per_table = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(
            cfg.source_map.cross_cutting_project.as_deref(),
            Some("Inventory")
        );
    }

    #[test]
    fn minimal_is_valid() {
        validate(&Config::minimal()).unwrap();
    }
}
