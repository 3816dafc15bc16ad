//! Configuration loading and validation for Convoy.
//!
//! Loads configuration from `~/.convoy/config.toml` with environment
//! variable overrides. Validates all settings at load time.

use convoy_core::{InferenceConfig, SystemPromptTemplate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.convoy/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// API key for the remote endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Agent display name
    #[serde(default = "default_name")]
    pub name: String,

    /// Agent description, substituted into the default system prompt
    #[serde(default = "default_description")]
    pub description: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Stream responses instead of buffering them
    #[serde(default)]
    pub streaming: bool,

    /// Request JSON-object output from the model
    #[serde(default)]
    pub format_response_as_json: bool,

    /// Maximum tool-execution rounds per request
    #[serde(default = "default_tool_max_recursions")]
    pub tool_max_recursions: u32,

    /// Sampling parameters
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Custom system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<SystemPromptTemplate>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_name() -> String {
    "Convoy Assistant".into()
}
fn default_description() -> String {
    "A helpful general-purpose assistant".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_tool_max_recursions() -> u32 {
    5
}

impl std::fmt::Debug for AgentSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSettings")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("model", &self.model)
            .field("streaming", &self.streaming)
            .field("format_response_as_json", &self.format_response_as_json)
            .field("tool_max_recursions", &self.tool_max_recursions)
            .field("inference", &self.inference)
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl AgentSettings {
    /// Load configuration from the default path (~/.convoy/config.toml).
    ///
    /// Environment overrides:
    /// - `CONVOY_API_KEY`, then `OPENAI_API_KEY` (only when the file sets no key)
    /// - `CONVOY_MODEL`
    /// - `CONVOY_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_overrides(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
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

    /// Apply overrides from an environment lookup.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("CONVOY_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(model) = lookup("CONVOY_MODEL") {
            self.model = model;
        }

        if let Some(base_url) = lookup("CONVOY_BASE_URL") {
            self.base_url = base_url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".convoy")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.inference.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "inference.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if let Some(p) = self.inference.top_p
            && !(0.0..=1.0).contains(&p)
        {
            return Err(ConfigError::ValidationError(
                "inference.top_p must be between 0.0 and 1.0".into(),
            ));
        }

        if self.tool_max_recursions == 0 {
            return Err(ConfigError::ValidationError(
                "tool_max_recursions must be at least 1".into(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        Ok(())
    }

    /// Render the configuration as TOML (API key omitted).
    pub fn to_redacted_toml(&self) -> String {
        let redacted = Self {
            api_key: None,
            ..self.clone()
        };
        toml::to_string_pretty(&redacted).unwrap_or_default()
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            name: default_name(),
            description: default_description(),
            model: default_model(),
            streaming: false,
            format_response_as_json: false,
            tool_max_recursions: default_tool_max_recursions(),
            inference: InferenceConfig::default(),
            system_prompt: None,
        }
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
