use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_OPENROUTER_MODEL: &str = "qwen/qwen3-vl-235b-a22b-instruct";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    #[serde(default)]
    pub max_capture_retries: u32,
    #[serde(default = "default_start_url")]
    pub start_url: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
}

fn default_provider() -> String {
    "openrouter".to_string()
}

fn default_max_steps() -> u32 {
    10
}

fn default_max_images() -> usize {
    1
}

fn default_start_url() -> String {
    "https://www.google.com".to_string()
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> String {
    "results".to_string()
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openrouter: Option<OpenRouterConfig>,
    #[serde(default)]
    pub openai: Option<OpenAIConfig>,
    #[serde(default)]
    pub openai_compatible: Option<OpenAICompatibleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

impl OpenRouterConfig {
    /// Configured key, falling back to `OPENROUTER_API_KEY`.
    pub fn resolved_key(&self) -> Option<String> {
        configured_or_env(self.api_key.as_deref(), "OPENROUTER_API_KEY")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

impl OpenAIConfig {
    /// Configured key, falling back to `OPENAI_API_KEY`.
    pub fn resolved_key(&self) -> Option<String> {
        configured_or_env(self.api_key.as_deref(), "OPENAI_API_KEY")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAICompatibleConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

fn configured_or_env(configured: Option<&str>, var: &str) -> Option<String> {
    if let Some(key) = configured {
        if !key.trim().is_empty() {
            return Some(key.trim().to_string());
        }
    }
    env::var(var)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                default_provider: default_provider(),
                max_steps: default_max_steps(),
                max_images: default_max_images(),
                max_capture_retries: 0,
                start_url: default_start_url(),
                headless: true,
                output_dir: default_output_dir(),
                viewport_width: default_viewport_width(),
                viewport_height: default_viewport_height(),
            },
            providers: ProvidersConfig {
                openrouter: Some(OpenRouterConfig {
                    api_key: None,
                    model: DEFAULT_OPENROUTER_MODEL.to_string(),
                }),
                openai: None,
                openai_compatible: None,
            },
        }
    }
}

impl Config {
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirFound)?;
        Ok(config_dir.join("webnav").join("config.toml"))
    }

    /// Load the config, writing the defaults on first run.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        if !path.exists() {
            let config = Config::default();
            config.save()?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }
}
