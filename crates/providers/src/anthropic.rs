//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field
//! - Extended thinking blocks are folded back into the text as
//!   `<thinking>` so downstream recovery strips them like any other
//!   reasoning wrapper

use async_trait::async_trait;
use caduceus_core::error::ProviderError;
use caduceus_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{http_client, send_error, status_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    /// Budget tokens for extended thinking, when enabled.
    thinking_budget: Option<u32>,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: http_client(300), // Anthropic can be slow with thinking
            thinking_budget: None,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the HTTP client timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.client = http_client(timeout_secs);
        self
    }

    /// Enable extended thinking. Requests then go out at temperature 1,
    /// the only value the API accepts with thinking on.
    pub fn with_extended_thinking(mut self, budget_tokens: u32) -> Self {
        self.thinking_budget = Some(budget_tokens);
        self
    }

    fn build_body(&self, request: &GenerateRequest) -> serde_json::Value {
        let messages = vec![AnthropicMessage {
            role: "user".into(),
            content: request.prompt.clone(),
        }];

        let max_tokens = request.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let mut body = serde_json::json!({
            "model": request.options.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": request.options.temperature,
        });

        if let Some(ref sys) = request.system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.options.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.options.stop);
        }

        if let Some(budget) = self.thinking_budget {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget
            });
            body["temperature"] = serde_json::json!(1.0);
            if max_tokens <= budget {
                body["max_tokens"] = serde_json::json!(budget.saturating_add(DEFAULT_MAX_TOKENS));
            }
        }

        body
    }

    /// Convert an Anthropic API response to a generation.
    fn parse_response(resp: AnthropicResponse) -> Generation {
        let mut text_content = String::new();
        let mut thinking = String::new();

        for block in &resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(text);
                }
                ResponseContentBlock::Thinking { thinking: t } => thinking.push_str(t),
                ResponseContentBlock::Other => {}
            }
        }

        if !thinking.is_empty() {
            text_content = format!("<thinking>{thinking}</thinking>\n{text_content}");
        }

        if let Some(reason) = resp.stop_reason.as_deref()
            && reason == "max_tokens"
        {
            debug!(model = %resp.model, "Generation hit max_tokens; output may be truncated");
        }

        Generation {
            content: text_content,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens.saturating_add(resp.usage.output_tokens),
            }),
            model: resp.model,
        }
    }
}

#[async_trait]
impl caduceus_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request);

        debug!(provider = "anthropic", model = %request.options.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(status_error(status, error_body, "Invalid Anthropic API key"));
        }

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;

        Ok(Self::parse_response(api_resp))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        // Minimal request to verify the API key
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": "claude-3-5-haiku-20241022",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;

        // 401 = bad key; anything else means the API is reachable
        Ok(response.status().as_u16() != 401)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use caduceus_core::Provider;

    fn request() -> GenerateRequest {
        GenerateRequest {
            system: Some("Respond in JSON.".into()),
            prompt: "Summarize the labs.".into(),
            options: GenerateOptions::new("claude-sonnet-4-20250514"),
        }
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert!(provider.thinking_budget.is_none());
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test").with_base_url("http://proxy:8080/");
        assert_eq!(provider.base_url, "http://proxy:8080");
    }

    #[test]
    fn body_has_top_level_system() {
        let provider = AnthropicProvider::new("k");
        let body = provider.build_body(&request());
        assert_eq!(body["system"], "Respond in JSON.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn extended_thinking_in_body() {
        let provider = AnthropicProvider::new("k").with_extended_thinking(2048);
        let body = provider.build_body(&request());
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);

        let mut small = request();
        small.options.max_tokens = Some(1024);
        let body = provider.build_body(&small);
        assert_eq!(body["max_tokens"], 2048 + DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn parse_text_response() {
        let raw = r#"{
            "id": "msg_1",
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "{\"score\": 3}"}],
            "usage": {"input_tokens": 20, "output_tokens": 6},
            "stop_reason": "end_turn"
        }"#;
        let resp: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let generation = AnthropicProvider::parse_response(resp);
        assert_eq!(generation.content, "{\"score\": 3}");
        assert_eq!(generation.usage.unwrap().total_tokens, 26);
    }

    #[test]
    fn parse_thinking_response() {
        let raw = r#"{
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "thinking", "thinking": "Consider renal dosing."},
                {"type": "text", "text": "{\"final_answer\": \"reduce dose\"}"},
                {"type": "tool_use", "id": "t1", "name": "x", "input": {}}
            ],
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }"#;
        let resp: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let generation = AnthropicProvider::parse_response(resp);
        assert!(generation.content.starts_with("<thinking>Consider renal dosing.</thinking>"));
        assert!(generation.content.ends_with("{\"final_answer\": \"reduce dose\"}"));
    }
}
