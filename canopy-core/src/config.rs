use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct CanopyConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub mastery: MasteryConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            max_retries: 3,
            retry_delay_ms: 1000,
            timeout_seconds: 30,
            max_tokens: 1500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Documents below this many characters are rejected before the LLM call.
    pub min_document_chars: usize,
    /// Node budget applied when the caller does not pass one (0 = unlimited).
    pub default_max_nodes: i32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_document_chars: 100,
            default_max_nodes: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MasteryConfig {
    /// Consecutive correct answers required before a node counts as mastered.
    pub mastery_threshold: i32,
    /// Honor the per-relation highlight flag as initial mastery when building
    /// a fresh graph. Off by default: a regenerated graph starts unlit and
    /// prior progress is restored by the merge step instead.
    pub seed_from_extraction: bool,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            mastery_threshold: 1,
            seed_from_extraction: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8970,
        }
    }
}

impl CanopyConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
