//! Provider selection. Builds the one configured back-end; the caller
//! passes the resulting `Arc<dyn Provider>` to every run explicitly.

use std::fmt;
use std::sync::Arc;

use caduceus_config::ProviderConfig;
use caduceus_core::{Provider, ProviderError};
use tracing::info;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Which back-end to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    OpenRouter,
    Ollama,
    /// Any other OpenAI-compatible endpoint, by name.
    Compatible(String),
}

impl ProviderKind {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Self::Anthropic,
            "openai" => Self::OpenAi,
            "openrouter" => Self::OpenRouter,
            "ollama" => Self::Ollama,
            other => Self::Compatible(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
            Self::Compatible(name) => name,
        }
    }

    fn needs_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to construct a provider.
#[derive(Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Extended-thinking budget; only Anthropic uses it.
    pub thinking_budget: Option<u32>,
}

impl ProviderSettings {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            kind: ProviderKind::parse(&config.kind),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
            thinking_budget: config.thinking_budget,
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("thinking_budget", &self.thinking_budget)
            .finish()
    }
}

/// Build the configured provider.
pub fn build(settings: &ProviderSettings) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = match (&settings.api_key, settings.kind.needs_api_key()) {
        (Some(key), _) => key.clone(),
        (None, false) => String::new(),
        (None, true) => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{}' (set CADUCEUS_API_KEY)",
                settings.kind
            )));
        }
    };

    let base_url = settings
        .api_url
        .clone()
        .or_else(|| default_base_url(&settings.kind).map(String::from));

    let provider: Arc<dyn Provider> = match &settings.kind {
        ProviderKind::Anthropic => {
            let mut p = AnthropicProvider::new(api_key).with_timeout(settings.timeout_secs);
            if let Some(url) = &settings.api_url {
                p = p.with_base_url(url);
            }
            if let Some(budget) = settings.thinking_budget {
                p = p.with_extended_thinking(budget);
            }
            Arc::new(p)
        }
        kind => {
            let Some(base_url) = base_url else {
                return Err(ProviderError::NotConfigured(format!(
                    "provider '{kind}' needs provider.api_url"
                )));
            };
            Arc::new(
                OpenAiCompatProvider::new(kind.as_str(), base_url, api_key)
                    .with_timeout(settings.timeout_secs),
            )
        }
    };

    info!(provider = %settings.kind, "Provider ready");
    Ok(provider)
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(kind: &ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::Anthropic => None,
        ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
        ProviderKind::OpenRouter => Some("https://openrouter.ai/api/v1"),
        ProviderKind::Ollama => Some("http://localhost:11434/v1"),
        ProviderKind::Compatible(name) => match name.as_str() {
            "deepseek" => Some("https://api.deepseek.com/v1"),
            "groq" => Some("https://api.groq.com/openai/v1"),
            "together" => Some("https://api.together.xyz/v1"),
            "vllm" => Some("http://localhost:8000/v1"),
            _ => None,
        },
    }
}
