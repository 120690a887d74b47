//! Anthropic Claude API client
//!
//! Implements the LlmClient trait against the Messages API with blocking
//! and streaming (SSE) variants. Schema-constrained requests are expressed
//! as a forced tool call whose input schema is the caller's JSON schema;
//! the tool input comes back as the response content.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, StreamChunk, TokenUsage};
use crate::config::LlmConfig;

/// Name of the synthetic tool used to force schema-shaped output
const SCHEMA_TOOL: &str = "respond";

pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl AnthropicClient {
    /// Create a client from configuration. The API key is read from the
    /// environment variable named in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| LlmError::Auth(format!("Environment variable {} not set", config.api_key_env)))?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
        })
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "system": request.system_prompt,
            "messages": self.convert_messages(&request.messages),
        });

        if let Some(schema) = &request.json_schema {
            body["tools"] = serde_json::json!([{
                "name": SCHEMA_TOOL,
                "description": "Report the structured result of this phase",
                "input_schema": schema,
            }]);
            body["tool_choice"] = serde_json::json!({ "type": "tool", "name": SCHEMA_TOOL });
        }

        body
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": msg.role,
                    "content": msg.content,
                })
            })
            .collect()
    }

    fn parse_response(&self, api_response: AnthropicResponse) -> CompletionResponse {
        let mut content = String::new();

        for block in api_response.content {
            match block {
                AnthropicContentBlock::Text { text } => content.push_str(&text),
                // Forced schema tool: the input IS the structured response
                AnthropicContentBlock::ToolUse { input, .. } => {
                    content = input.to_string();
                }
            }
        }

        CompletionResponse {
            content,
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
                cache_read_tokens: api_response.usage.cache_read_input_tokens.unwrap_or(0),
                cache_creation_tokens: api_response.usage.cache_creation_input_tokens.unwrap_or(0),
            },
        }
    }

    fn status_error(status: u16, message: String) -> LlmError {
        match status {
            401 | 403 => LlmError::Auth(message),
            _ => LlmError::Api { status, message },
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);

        let response = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);

            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, text));
        }

        let api_response: AnthropicResponse = response.json().await?;
        let parsed = self.parse_response(api_response);
        if parsed.content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(parsed)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut body = self.build_request_body(&request);
        body["stream"] = serde_json::json!(true);

        let http_request = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body);

        let mut es = EventSource::new(http_request).map_err(|e| LlmError::Malformed(e.to_string()))?;

        let mut full_content = String::new();
        let mut current_tool: Option<(String, String)> = None; // (name, json_acc)
        let mut usage = TokenUsage::default();

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Message(msg)) => {
                    let data: serde_json::Value = serde_json::from_str(&msg.data).map_err(LlmError::Json)?;

                    match data["type"].as_str() {
                        Some("content_block_start") => {
                            if let Some(block) = data.get("content_block")
                                && block["type"] == "tool_use"
                            {
                                let name = block["name"].as_str().unwrap_or("").to_string();
                                current_tool = Some((name, String::new()));
                            }
                        }
                        Some("content_block_delta") => {
                            if let Some(delta) = data.get("delta") {
                                if let Some(text) = delta["text"].as_str() {
                                    full_content.push_str(text);
                                    let _ = chunk_tx.send(StreamChunk::TextDelta(text.to_string())).await;
                                }
                                if let Some(json) = delta["partial_json"].as_str()
                                    && let Some((_, ref mut acc)) = current_tool
                                {
                                    acc.push_str(json);
                                }
                            }
                        }
                        Some("content_block_stop") => {
                            if let Some((name, json)) = current_tool.take() {
                                if name == SCHEMA_TOOL {
                                    // Structured response arrives whole
                                    full_content = json.clone();
                                    let _ = chunk_tx.send(StreamChunk::TextDelta(json)).await;
                                } else {
                                    let _ = chunk_tx
                                        .send(StreamChunk::ToolCall {
                                            name,
                                            input: json,
                                        })
                                        .await;
                                }
                            }
                        }
                        Some("message_start") => {
                            if let Some(u) = data["message"].get("usage") {
                                usage.input_tokens = u["input_tokens"].as_u64().unwrap_or(0);
                                usage.cache_read_tokens = u["cache_read_input_tokens"].as_u64().unwrap_or(0);
                                usage.cache_creation_tokens = u["cache_creation_input_tokens"].as_u64().unwrap_or(0);
                            }
                        }
                        Some("message_delta") => {
                            if let Some(u) = data.get("usage") {
                                usage.output_tokens = u["output_tokens"].as_u64().unwrap_or(0);
                            }
                        }
                        Some("message_stop") => break,
                        _ => {}
                    }
                }
                Ok(Event::Open) => {}
                Err(e) => return Err(LlmError::Malformed(e.to_string())),
            }
        }

        let _ = chunk_tx.send(StreamChunk::Done { usage: usage.clone() }).await;

        if full_content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(CompletionResponse {
            content: full_content,
            usage,
        })
    }
}

// Anthropic API response types

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[allow(dead_code)]
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_input_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
}
