//! LLM request/response types
//!
//! Modeled on the Anthropic Messages API but provider-agnostic at the
//! trait boundary.

use serde::{Deserialize, Serialize};

/// Everything needed for one LLM call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt
    pub system_prompt: String,

    /// Conversation so far
    pub messages: Vec<Message>,

    /// When set, the model is constrained to emit JSON matching this schema
    pub json_schema: Option<serde_json::Value>,

    /// Max tokens for the response
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Plain text request with a single user message
    pub fn text(system_prompt: impl Into<String>, user: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: vec![Message::user(user)],
            json_schema: None,
            max_tokens,
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Response summary from a completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    /// Full text content (empty when the model produced nothing)
    pub content: String,

    /// Token usage for cost tracking
    pub usage: TokenUsage,
}

/// Streaming events delivered while a response is generated
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Text being generated
    TextDelta(String),

    /// A tool invocation surfaced by the assistant
    ToolCall { name: String, input: String },

    /// Output of a tool invocation
    ToolResult { content: String },

    /// Stream finished; summary matches the blocking response
    Done { usage: TokenUsage },
}

/// Token usage for cost tracking; cache counters accumulate separately
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    /// Cost in USD based on model pricing
    pub fn cost_usd(&self, model: &str) -> f64 {
        let (input_price, output_price) = match model {
            m if m.contains("opus") => (15.0, 75.0),
            m if m.contains("sonnet") => (3.0, 15.0),
            m if m.contains("haiku") => (0.25, 1.25),
            _ => (3.0, 15.0),
        };

        let input_cost = (self.input_tokens as f64 / 1_000_000.0) * input_price;
        let output_cost = (self.output_tokens as f64 / 1_000_000.0) * output_price;
        // Cache reads are 90% cheaper than fresh input
        let cache_cost = (self.cache_read_tokens as f64 / 1_000_000.0) * input_price * 0.1;

        input_cost + output_cost + cache_cost
    }

    /// Fold another usage summary into this one
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");

        let msg = Message::assistant("Hi");
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn test_cost_sonnet_with_cache() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
            cache_creation_tokens: 0,
            cache_read_tokens: 500_000,
        };
        // $3 input + $1.50 output + $0.15 cache reads at 10%
        let cost = usage.cost_usd("claude-sonnet-4");
        assert!((cost - 4.65).abs() < 0.01);
    }

    #[test]
    fn test_cost_opus() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
            ..Default::default()
        };
        let cost = usage.cost_usd("claude-opus-4");
        assert!((cost - 22.5).abs() < 0.01);
    }

    #[test]
    fn test_accumulate() {
        let mut total = TokenUsage::default();
        let one = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_tokens: 2,
            cache_read_tokens: 3,
        };
        total.accumulate(&one);
        total.accumulate(&one);
        assert_eq!(total.input_tokens, 20);
        assert_eq!(total.cache_read_tokens, 6);
    }
}
