//! Application settings
//!
//! Loaded once at process start from `~/.config/ragtrace/config.toml`
//! (or `RAGTRACE_CONFIG`) and passed explicitly to every component.
//! API keys may come from the environment instead of the file.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

impl Default for LlmProvider {
    fn default() -> Self {
        Self::OpenAI
    }
}

/// LLM section of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub provider: LlmProvider,
    pub model: String,
    /// API key; falls back to `OPENAI_API_KEY` / `ANTHROPIC_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Custom base URL for OpenAI-compatible servers.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    10
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            model: "gpt-4o".to_string(),
            api_key: None,
            base_url: None,
            temperature: None,
            max_iterations: default_max_iterations(),
        }
    }
}

/// Embedding section of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// API key; falls back to `EMBEDDING_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Prefix prepended to documents before embedding (model-specific).
    #[serde(default)]
    pub document_prefix: String,
    /// Prefix prepended to search queries before embedding.
    #[serde(default)]
    pub search_prefix: String,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    1536
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            api_key: None,
            base_url: None,
            dimension: default_embedding_dimension(),
            document_prefix: String::new(),
            search_prefix: String::new(),
        }
    }
}

/// Turn tracing section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSettings {
    /// Path of the JSONL trace export; defaults to `<data_dir>/traces.jsonl`.
    #[serde(default)]
    pub export_path: Option<PathBuf>,
}

/// Application settings, constructed once at startup.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub trace: TraceSettings,
    /// Override for the data directory (database, corpus, traces).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default location or `RAGTRACE_CONFIG`,
    /// apply environment overrides, and validate.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os("RAGTRACE_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::default_path(),
        };

        let mut settings = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            _ => Self::default(),
        };

        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Default configuration file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ragtrace").join("config.toml"))
    }

    /// Environment variables win over file values for secrets.
    fn apply_env(&mut self) {
        let key_env = match self.llm.provider {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
        };
        if let Ok(key) = std::env::var(key_env)
            && !key.trim().is_empty()
        {
            self.llm.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY")
            && !key.trim().is_empty()
        {
            self.embedding.api_key = Some(key);
        }
    }

    /// Per-provider required-field validation.
    pub fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            bail!("llm.model must not be empty");
        }

        match self.llm.provider {
            // An OpenAI-compatible local server needs no key.
            LlmProvider::OpenAI => {
                if self.llm.api_key.is_none() && self.llm.base_url.is_none() {
                    bail!("llm.api_key (or OPENAI_API_KEY) is required for provider 'openai'");
                }
            }
            LlmProvider::Anthropic => {
                if self.llm.api_key.is_none() {
                    bail!("llm.api_key (or ANTHROPIC_API_KEY) is required for provider 'anthropic'");
                }
            }
        }

        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be positive");
        }

        Ok(())
    }
}

// Settings are logged at startup; keep secrets out of the output.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("llm.provider", &self.llm.provider)
            .field("llm.model", &self.llm.model)
            .field("llm.api_key", &self.llm.api_key.as_ref().map(|_| "***"))
            .field("llm.base_url", &self.llm.base_url)
            .field("llm.temperature", &self.llm.temperature)
            .field("llm.max_iterations", &self.llm.max_iterations)
            .field("embedding.model", &self.embedding.model)
            .field(
                "embedding.api_key",
                &self.embedding.api_key.as_ref().map(|_| "***"),
            )
            .field("embedding.base_url", &self.embedding.base_url)
            .field("embedding.dimension", &self.embedding.dimension)
            .field("trace.export_path", &self.trace.export_path)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let settings: Settings = toml::from_str(
            r#"
            [llm]
            provider = "anthropic"
            model = "claude-sonnet-4-5"
            api_key = "sk-test"
            "#,
        )
        .unwrap();

        assert_eq!(settings.llm.provider, LlmProvider::Anthropic);
        assert_eq!(settings.llm.max_iterations, 10);
        assert_eq!(settings.embedding.dimension, 1536);
        settings.validate().unwrap();
    }

    #[test]
    fn openai_without_key_requires_base_url() {
        let mut settings = Settings::default();
        settings.llm.api_key = None;
        assert!(settings.validate().is_err());

        settings.llm.base_url = Some("http://localhost:8000/v1".into());
        settings.validate().unwrap();
    }

    #[test]
    fn anthropic_requires_api_key() {
        let settings: Settings = toml::from_str(
            r#"
            [llm]
            provider = "anthropic"
            model = "claude-sonnet-4-5"
            "#,
        )
        .unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("sk-secret".into());

        let output = format!("{settings:?}");
        assert!(!output.contains("sk-secret"));
        assert!(output.contains("***"));
    }
}
