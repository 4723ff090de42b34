//! Provider trait — the abstraction over text-generation back-ends.
//!
//! A Provider takes a prompt (plus an optional system prompt) and returns
//! the generated text. The agent loop never knows which back-end answered.
//!
//! Implementations: OpenAI-compatible endpoints, Anthropic Messages API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Per-call generation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// The model to use (e.g., "claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.2
}

impl GenerateOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: None,
            stop: Vec::new(),
        }
    }
}

/// A single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// System instructions, sent the way each back-end expects them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The user-turn prompt
    pub prompt: String,

    pub options: GenerateOptions,
}

/// The generated text and what it cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Add another usage record into this one, saturating at `u32::MAX`.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// The core Provider trait.
///
/// Every text-generation back-end implements this trait. Selection happens
/// by explicit configuration when the caller builds a controller, so many
/// runs can share one `Arc<dyn Provider>` read-only.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get the complete generated text.
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError>;

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults() {
        let opts = GenerateOptions::new("gpt-4o");
        assert!((opts.temperature - 0.2).abs() < f32::EPSILON);
        assert!(opts.max_tokens.is_none());
        assert!(opts.stop.is_empty());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.accumulate(&Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        });
        assert_eq!(total.prompt_tokens, 11);
        assert_eq!(total.total_tokens, 18);
    }

    #[test]
    fn usage_saturates_instead_of_overflowing() {
        let mut total = Usage {
            prompt_tokens: u32::MAX - 1,
            completion_tokens: 0,
            total_tokens: u32::MAX,
        };
        total.accumulate(&Usage {
            prompt_tokens: 10,
            completion_tokens: 3,
            total_tokens: 13,
        });
        assert_eq!(total.prompt_tokens, u32::MAX);
        assert_eq!(total.completion_tokens, 3);
        assert_eq!(total.total_tokens, u32::MAX);
    }

    #[test]
    fn request_serialization_skips_empty_system() {
        let req = GenerateRequest {
            system: None,
            prompt: "Assess chest pain".into(),
            options: GenerateOptions::new("m"),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("system"));
        assert!(json.contains("Assess chest pain"));
    }
}
