//! OpenAI-compatible chat completions client
//!
//! Implements the LlmClient trait for any provider exposing the
//! `/chat/completions` endpoint (DeepSeek, OpenAI).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StopReason, TokenUsage};
use crate::config::LlmConfig;

/// Maximum prompt length in characters sent to the service
const MAX_PROMPT_CHARS: usize = 10_000;

/// Default retry-after when a 429 carries no header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Strip control characters (keeping newlines and tabs) and cap the length
pub fn sanitize_prompt(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.chars().count() > MAX_PROMPT_CHARS {
        let truncated: String = trimmed.chars().take(MAX_PROMPT_CHARS).collect();
        format!("{}...", truncated)
    } else {
        trimmed.to_string()
    }
}

/// OpenAI-compatible API client
pub struct OpenAIClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl OpenAIClient {
    /// Create a new client from configuration
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(provider = %config.provider, model = %config.model, "from_config: called");
        let api_key = config.get_api_key().map_err(|e| LlmError::Config(e.to_string()))?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout,
        })
    }

    /// Build the request body for the chat completions API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": sanitize_prompt(&request.system_prompt),
            }));
        }
        for msg in &request.messages {
            messages.push(serde_json::json!({
                "role": msg.role.as_str(),
                "content": sanitize_prompt(&msg.content),
            }));
        }

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "temperature": request.temperature.unwrap_or(self.temperature),
        })
    }

    /// Parse the chat completions response
    fn parse_response(&self, api_response: ChatResponse) -> CompletionResponse {
        debug!(choice_count = api_response.choices.len(), "parse_response: called");
        let (content, stop_reason) = match api_response.choices.into_iter().next() {
            Some(c) => (c.message.content, StopReason::from_finish_reason(c.finish_reason.as_deref())),
            None => (None, StopReason::EndTurn),
        };

        let usage = api_response.usage.unwrap_or_default();
        CompletionResponse {
            content,
            stop_reason,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "complete: called");
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    debug!("complete: request timed out");
                    LlmError::Timeout(self.timeout)
                } else {
                    debug!(error = %e, "complete: network error");
                    LlmError::Network(e)
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            debug!("complete: rate limited (429)");
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            debug!(%status, "complete: API error");
            let text = response.text().await.unwrap_or_default();
            if status == 402 {
                return Err(LlmError::InsufficientBalance(text));
            }
            return Err(LlmError::ApiError { status, message: text });
        }

        debug!("complete: success");
        let api_response: ChatResponse = response.json().await?;
        let parsed = self.parse_response(api_response);
        if parsed.content.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(parsed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Chat completions response types

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    fn test_client() -> OpenAIClient {
        OpenAIClient {
            model: "deepseek-chat".to_string(),
            api_key: "sk-test".to_string(),
            base_url: "https://api.deepseek.com/v1".to_string(),
            http: Client::new(),
            max_tokens: 4000,
            temperature: 0.7,
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_prompt("  a\u{0007}b\nc\t "), "ab\nc");
    }

    #[test]
    fn test_sanitize_truncates_long_input() {
        let long = "x".repeat(MAX_PROMPT_CHARS + 50);
        let out = sanitize_prompt(&long);
        assert_eq!(out.chars().count(), MAX_PROMPT_CHARS + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_build_request_body() {
        let client = test_client();
        let request = CompletionRequest {
            system_prompt: "be terse".to_string(),
            messages: vec![Message::user("draw a flowchart")],
            max_tokens: 10_000,
            temperature: Some(0.2),
        };

        let body = client.build_request_body(&request);
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["max_tokens"], 4000);
        let temp = body["temperature"].as_f64().unwrap();
        assert!((temp - 0.2).abs() < 1e-6);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "draw a flowchart");
    }

    #[test]
    fn test_build_request_body_uses_default_temperature() {
        let client = test_client();
        let body = client.build_request_body(&CompletionRequest::prompt("hi", 100, None));
        let temp = body["temperature"].as_f64().unwrap();
        assert!((temp - 0.7).abs() < 1e-6);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_response() {
        let json = r#"{
            "choices": [{"message": {"content": "graph TD\nA-->B"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        }"#;
        let api: ChatResponse = serde_json::from_str(json).unwrap();
        let resp = test_client().parse_response(api);
        assert_eq!(resp.content.as_deref(), Some("graph TD\nA-->B"));
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert_eq!(resp.usage.total(), 19);
    }

    #[test]
    fn test_parse_response_without_usage() {
        let json = r#"{"choices": [{"message": {"content": "ok"}, "finish_reason": "length"}]}"#;
        let api: ChatResponse = serde_json::from_str(json).unwrap();
        let resp = test_client().parse_response(api);
        assert_eq!(resp.stop_reason, StopReason::MaxTokens);
        assert_eq!(resp.usage, TokenUsage::default());
    }
}
