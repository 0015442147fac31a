//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nested keys, e.g.
//! `APP_EMBEDDING__PROVIDER=dashscope`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::schema::RowSchema;

const DASHSCOPE_KEY_PLACEHOLDER: &str = "YOUR_DASHSCOPE_API_KEY_HERE";

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())).merge(figment) }
    }

    /// Typed, validated settings.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub rerank: RerankSettings,
    /// Extra source schemas registered on top of the built-in ones.
    pub schemas: Vec<RowSchema>,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        match self.embedding.provider {
            ProviderKind::DashScope => {
                self.embedding.dashscope.resolved_api_key()?;
                if self.embedding.dashscope.batch_size == 0 {
                    return Err(Error::InvalidConfig("embedding.dashscope.batch_size must be >= 1".into()));
                }
            }
            ProviderKind::Ollama => {
                if self.embedding.ollama.host.trim().is_empty() {
                    return Err(Error::InvalidConfig("embedding.ollama.host is empty".into()));
                }
                if self.embedding.ollama.batch_size == 0 {
                    return Err(Error::InvalidConfig("embedding.ollama.batch_size must be >= 1".into()));
                }
            }
            ProviderKind::Local | ProviderKind::Fake => {}
        }
        if self.index.collection.trim().is_empty() {
            return Err(Error::InvalidConfig("index.collection is empty".into()));
        }
        if self.rerank.max_length == 0 {
            return Err(Error::InvalidConfig("rerank.max_length must be >= 1".into()));
        }
        Ok(())
    }
}

/// Embedding backend, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    #[serde(rename = "dashscope")]
    DashScope,
    Local,
    Fake,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::DashScope => "dashscope",
            ProviderKind::Local => "local",
            ProviderKind::Fake => "fake",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,
    pub ollama: OllamaSettings,
    pub dashscope: DashScopeSettings,
    pub local: LocalModelSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub host: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "dengcao/qwen3-embedding-0.6b".to_string(),
            dimensions: 1024,
            batch_size: 32,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashScopeSettings {
    /// Falls back to `DASHSCOPE_API_KEY` when unset.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    /// Hard ceiling imposed by the service.
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for DashScopeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://dashscope.aliyuncs.com/api/v1".to_string(),
            model: "text-embedding-v4".to_string(),
            dimensions: 1024,
            batch_size: 10,
            timeout_secs: 60,
        }
    }
}

impl DashScopeSettings {
    pub fn resolved_api_key(&self) -> Result<String> {
        let key = self
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env::var("DASHSCOPE_API_KEY").ok())
            .map(|k| k.trim().to_string())
            .unwrap_or_default();
        if key.is_empty() || key == DASHSCOPE_KEY_PLACEHOLDER {
            return Err(Error::InvalidConfig(
                "DashScope API key is not set (embedding.dashscope.api_key or DASHSCOPE_API_KEY)".into(),
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelSettings {
    pub model_dir: Option<String>,
    pub max_len: usize,
    pub batch_size: usize,
}

impl Default for LocalModelSettings {
    fn default() -> Self { Self { model_dir: None, max_len: 256, batch_size: 16 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub path: String,
    pub collection: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { path: "./lancedb".to_string(), collection: "exam_questions".to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankBackend {
    #[default]
    Qwen3,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub backend: RerankBackend,
    pub model_dir: Option<String>,
    pub max_length: usize,
    /// Overrides the built-in task instruction.
    pub instruction: Option<String>,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self { backend: RerankBackend::Qwen3, model_dir: None, max_length: 512, instruction: None }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
