//! Configuration loading, validation, and management for Caduceus.
//!
//! Loads configuration from `~/.caduceus/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.caduceus/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Text-generation back-end
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Progress streaming
    #[serde(default)]
    pub stream: StreamConfig,

    /// In-memory trace collection
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Smallest extended-thinking budget the Anthropic API accepts.
pub const MIN_THINKING_BUDGET: u32 = 1024;

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Back-end kind: "anthropic", "openai", "openrouter", "ollama", or any
    /// OpenAI-compatible endpoint given with `api_url`.
    #[serde(default = "default_provider")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// HTTP request timeout for one model call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extended-thinking token budget (Anthropic only). Forces temperature 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider(),
            api_url: None,
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            thinking_budget: None,
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("thinking_budget", &self.thinking_budget)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on think/act/observe cycles per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Observations longer than this are truncated before entering the transcript
    #[serde(default = "default_observation_max_chars")]
    pub observation_max_chars: usize,

    /// Per-invocation limit for a capability handler
    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    6
}
fn default_observation_max_chars() -> usize {
    4000
}
fn default_capability_timeout_secs() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            observation_max_chars: default_observation_max_chars(),
            capability_timeout_secs: default_capability_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Frames buffered between the run task and the transport
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Completed run traces kept in memory
    #[serde(default = "default_max_traces")]
    pub max_traces: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_traces() -> usize {
    1000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_traces: default_max_traces(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.caduceus/config.toml).
    ///
    /// Environment overrides:
    /// - `CADUCEUS_API_KEY`, then `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`
    /// - `CADUCEUS_PROVIDER`
    /// - `CADUCEUS_MODEL`
    /// - `CADUCEUS_MAX_ITERATIONS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply overrides from an environment lookup, then re-validate.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = var("CADUCEUS_PROVIDER") {
            self.provider.kind = kind;
        }

        if let Some(key) = var("CADUCEUS_API_KEY") {
            self.provider.api_key = Some(key);
        } else if self.provider.api_key.is_none() {
            self.provider.api_key = match self.provider.kind.as_str() {
                "anthropic" => var("ANTHROPIC_API_KEY"),
                _ => var("OPENAI_API_KEY"),
            };
        }

        if let Some(model) = var("CADUCEUS_MODEL") {
            self.provider.model = model;
        }

        if let Some(raw) = var("CADUCEUS_MAX_ITERATIONS") {
            self.agent.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CADUCEUS_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".caduceus")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "provider.timeout_secs must be at least 1".into(),
            ));
        }

        if let Some(budget) = self.provider.thinking_budget
            && (budget < MIN_THINKING_BUDGET || budget >= self.provider.max_tokens)
        {
            return Err(ConfigError::ValidationError(format!(
                "provider.thinking_budget must be at least {MIN_THINKING_BUDGET} and below provider.max_tokens"
            )));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.observation_max_chars < 64 {
            return Err(ConfigError::ValidationError(
                "agent.observation_max_chars must be at least 64".into(),
            ));
        }

        if self.agent.capability_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.capability_timeout_secs must be at least 1".into(),
            ));
        }

        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "stream.channel_capacity must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
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
