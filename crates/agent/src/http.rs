//! `reqwest` client for hosted and local chat models.
//!
//! Speaks the OpenAI chat-completions, Anthropic messages and Ollama chat wire
//! formats. Streaming bodies (server-sent events for OpenAI and Anthropic,
//! newline-delimited JSON for Ollama) are read to the end and assembled into a
//! single reply, so callers see the same `String` either way.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::{GatewayConfig, GatewayProvider};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::warn;

use crate::llm::{GatewayError, ReasoningGateway};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;
const MAX_ERROR_BODY_CHARS: usize = 512;

pub fn default_base_url(provider: GatewayProvider) -> &'static str {
    match provider {
        GatewayProvider::OpenAi => "https://api.openai.com",
        GatewayProvider::Anthropic => "https://api.anthropic.com",
        GatewayProvider::Ollama => "http://localhost:11434",
    }
}

pub struct HttpReasoningGateway {
    client: reqwest::Client,
    provider: GatewayProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl HttpReasoningGateway {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| GatewayError::Transport(error.to_string()))?;
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or_else(|| default_base_url(config.provider))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> String {
        let path = match self.provider {
            GatewayProvider::OpenAi => "/v1/chat/completions",
            GatewayProvider::Anthropic => "/v1/messages",
            GatewayProvider::Ollama => "/api/chat",
        };
        format!("{}{path}", self.base_url)
    }

    pub fn request_body(&self, system_prompt: &str, context: &str, streaming: bool) -> Value {
        match self.provider {
            GatewayProvider::OpenAi | GatewayProvider::Ollama => json!({
                "model": self.model,
                "stream": streaming,
                "messages": [
                    { "role": "system", "content": system_prompt },
                    { "role": "user", "content": context },
                ],
            }),
            GatewayProvider::Anthropic => json!({
                "model": self.model,
                "max_tokens": ANTHROPIC_MAX_TOKENS,
                "stream": streaming,
                "system": system_prompt,
                "messages": [{ "role": "user", "content": context }],
            }),
        }
    }

    async fn send_once(&self, body: &Value) -> Result<String, GatewayError> {
        let mut request = self.client.post(self.endpoint()).json(body);
        match (self.provider, &self.api_key) {
            (GatewayProvider::OpenAi, Some(key)) => {
                request = request.bearer_auth(key.expose_secret());
            }
            (GatewayProvider::Anthropic, Some(key)) => {
                request = request
                    .header("x-api-key", key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION);
            }
            _ => {}
        }

        let response =
            request.send().await.map_err(|error| GatewayError::Transport(error.to_string()))?;
        let status = response.status();
        let text =
            response.text().await.map_err(|error| GatewayError::Transport(error.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl ReasoningGateway for HttpReasoningGateway {
    async fn generate(
        &self,
        system_prompt: &str,
        context: &str,
        streaming: bool,
    ) -> Result<String, GatewayError> {
        let body = self.request_body(system_prompt, context, streaming);
        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(raw) => return decode_response(self.provider, &raw, streaming),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "gateway.request.retrying",
                        provider = self.provider.as_str(),
                        attempt,
                        error = %error,
                        "retrying reasoning gateway request"
                    );
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(250 * 2_u64.pow(attempt.min(5)))
}

pub fn decode_response(
    provider: GatewayProvider,
    raw: &str,
    streaming: bool,
) -> Result<String, GatewayError> {
    if streaming {
        decode_stream(provider, raw)
    } else {
        decode_body(provider, raw)
    }
}

fn decode_body(provider: GatewayProvider, raw: &str) -> Result<String, GatewayError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|error| GatewayError::Decode(error.to_string()))?;

    let text = match provider {
        GatewayProvider::OpenAi => value.pointer("/choices/0/message/content").and_then(Value::as_str),
        GatewayProvider::Ollama => value.pointer("/message/content").and_then(Value::as_str),
        GatewayProvider::Anthropic => {
            let blocks = value.get("content").and_then(Value::as_array);
            return blocks
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|block| block.get("text").and_then(Value::as_str))
                        .collect::<String>()
                })
                .filter(|text| !text.is_empty())
                .ok_or_else(|| GatewayError::Decode("response has no text content".to_string()));
        }
    };

    text.map(str::to_string)
        .ok_or_else(|| GatewayError::Decode("response has no message content".to_string()))
}

fn decode_stream(provider: GatewayProvider, raw: &str) -> Result<String, GatewayError> {
    let mut assembled = String::new();

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let payload = match provider {
            GatewayProvider::Ollama => line,
            GatewayProvider::OpenAi | GatewayProvider::Anthropic => {
                match line.strip_prefix("data:") {
                    Some(data) => data.trim(),
                    // `event:` names and keep-alive comments carry no text.
                    None => continue,
                }
            }
        };
        if payload == "[DONE]" {
            break;
        }

        let chunk: Value = serde_json::from_str(payload)
            .map_err(|error| GatewayError::Decode(format!("stream chunk: {error}")))?;
        let piece = match provider {
            GatewayProvider::OpenAi => chunk.pointer("/choices/0/delta/content"),
            GatewayProvider::Ollama => chunk.pointer("/message/content"),
            GatewayProvider::Anthropic => {
                if chunk.get("type").and_then(Value::as_str) == Some("content_block_delta") {
                    chunk.pointer("/delta/text")
                } else {
                    None
                }
            }
        };
        if let Some(piece) = piece.and_then(Value::as_str) {
            assembled.push_str(piece);
        }
    }

    if assembled.is_empty() {
        return Err(GatewayError::Decode("stream carried no content".to_string()));
    }
    Ok(assembled)
}

#[cfg(test)]
mod tests {
    use parley_core::config::{GatewayConfig, GatewayProvider};

    use super::{decode_response, HttpReasoningGateway};
    use crate::llm::GatewayError;

    fn config(provider: GatewayProvider, base_url: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            provider,
            api_key: Some("sk-test".to_string().into()),
            base_url: base_url.map(str::to_string),
            model: "test-model".to_string(),
            timeout_secs: 5,
            max_retries: 0,
            streaming: false,
        }
    }

    #[test]
    fn endpoints_follow_provider_and_base_url() {
        let openai = HttpReasoningGateway::from_config(&config(GatewayProvider::OpenAi, None))
            .expect("client builds");
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        let ollama = HttpReasoningGateway::from_config(&config(
            GatewayProvider::Ollama,
            Some("http://gpu-box:11434/"),
        ))
        .expect("client builds");
        assert_eq!(ollama.endpoint(), "http://gpu-box:11434/api/chat");

        let anthropic =
            HttpReasoningGateway::from_config(&config(GatewayProvider::Anthropic, None))
                .expect("client builds");
        assert_eq!(anthropic.endpoint(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn request_bodies_carry_prompt_roles() {
        let openai = HttpReasoningGateway::from_config(&config(GatewayProvider::OpenAi, None))
            .expect("client builds");
        let body = openai.request_body("persona", "seller_1: hi", true);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "seller_1: hi");

        let anthropic =
            HttpReasoningGateway::from_config(&config(GatewayProvider::Anthropic, None))
                .expect("client builds");
        let body = anthropic.request_body("persona", "seller_1: hi", false);
        assert_eq!(body["system"], "persona");
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body["max_tokens"].as_u64().is_some());
    }

    #[test]
    fn decodes_complete_bodies() {
        let openai = r#"{"choices":[{"message":{"role":"assistant","content":"TRUE_<1.0>"}}]}"#;
        assert_eq!(decode_response(GatewayProvider::OpenAi, openai, false).as_deref(), Ok("TRUE_<1.0>"));

        let anthropic = r#"{"content":[{"type":"text","text":"0.8 ETH"},{"type":"text","text":" works."}]}"#;
        assert_eq!(
            decode_response(GatewayProvider::Anthropic, anthropic, false).as_deref(),
            Ok("0.8 ETH works.")
        );

        let ollama = r#"{"message":{"role":"assistant","content":"FALSE_<0>"},"done":true}"#;
        assert_eq!(decode_response(GatewayProvider::Ollama, ollama, false).as_deref(), Ok("FALSE_<0>"));
    }

    #[test]
    fn decodes_streamed_bodies() {
        let openai = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                      data: {\"choices\":[{\"delta\":{\"content\":\"TRUE_\"}}]}\n\n\
                      data: {\"choices\":[{\"delta\":{\"content\":\"<0.5>\"}}]}\n\n\
                      data: [DONE]\n";
        assert_eq!(decode_response(GatewayProvider::OpenAi, openai, true).as_deref(), Ok("TRUE_<0.5>"));

        let anthropic = "event: message_start\n\
                         data: {\"type\":\"message_start\"}\n\n\
                         event: content_block_delta\n\
                         data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n\
                         event: content_block_delta\n\
                         data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n\n\
                         event: message_stop\n\
                         data: {\"type\":\"message_stop\"}\n";
        assert_eq!(
            decode_response(GatewayProvider::Anthropic, anthropic, true).as_deref(),
            Ok("Hello there")
        );

        let ollama = "{\"message\":{\"content\":\"0.7\"},\"done\":false}\n\
                      {\"message\":{\"content\":\" ETH\"},\"done\":false}\n\
                      {\"message\":{\"content\":\"\"},\"done\":true}\n";
        assert_eq!(decode_response(GatewayProvider::Ollama, ollama, true).as_deref(), Ok("0.7 ETH"));
    }

    #[test]
    fn undecodable_bodies_are_gateway_errors() {
        assert!(matches!(
            decode_response(GatewayProvider::OpenAi, "<html>bad gateway</html>", false),
            Err(GatewayError::Decode(_))
        ));
        assert!(matches!(
            decode_response(GatewayProvider::OpenAi, r#"{"choices":[]}"#, false),
            Err(GatewayError::Decode(_))
        ));
        assert!(matches!(
            decode_response(GatewayProvider::Ollama, "", true),
            Err(GatewayError::Decode(_))
        ));
    }
}
