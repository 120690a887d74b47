//! LlmClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmError, StreamChunk};

/// Stateless LLM client - each call is independent.
///
/// The phase driver builds a fresh conversation per iteration; no state is
/// kept between calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request (blocking until complete)
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Streaming completion. Chunks are sent to the channel as they
    /// arrive; the returned summary matches what `complete` would yield.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;
}

/// Scripted client for tests. Not gated on `cfg(test)` so integration
/// tests can drive the full pipeline without a network.
pub mod mock {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::llm::TokenUsage;

    /// One scripted reply
    #[derive(Debug, Clone)]
    pub enum ScriptStep {
        /// Stream the chunks, then return the full content as the summary
        Respond {
            chunks: Vec<StreamChunk>,
            content: String,
            usage: TokenUsage,
        },
        /// Fail with a rate limit
        RateLimited { retry_after: Duration },
        /// Fail with a timeout
        Timeout,
        /// Return an empty response
        Empty,
    }

    impl ScriptStep {
        /// Plain text reply streamed as a single delta
        pub fn text(content: impl Into<String>) -> Self {
            let content = content.into();
            ScriptStep::Respond {
                chunks: vec![StreamChunk::TextDelta(content.clone())],
                content,
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                    ..Default::default()
                },
            }
        }

        /// Text reply preceded by a tool call + result pair
        pub fn text_with_tool(content: impl Into<String>, tool: &str, tool_input: &str, tool_output: &str) -> Self {
            let content = content.into();
            ScriptStep::Respond {
                chunks: vec![
                    StreamChunk::ToolCall {
                        name: tool.to_string(),
                        input: tool_input.to_string(),
                    },
                    StreamChunk::ToolResult {
                        content: tool_output.to_string(),
                    },
                    StreamChunk::TextDelta(content.clone()),
                ],
                content,
                usage: TokenUsage {
                    input_tokens: 120,
                    output_tokens: 80,
                    ..Default::default()
                },
            }
        }
    }

    /// Mock LLM client driven by a script of steps
    pub struct MockLlmClient {
        steps: Vec<ScriptStep>,
        cursor: Mutex<usize>,
        repeat_last: bool,
    }

    impl MockLlmClient {
        pub fn new(steps: Vec<ScriptStep>) -> Self {
            Self {
                steps,
                cursor: Mutex::new(0),
                repeat_last: false,
            }
        }

        /// Repeat the final step forever once the script is exhausted
        pub fn with_repeat_last(mut self) -> Self {
            self.repeat_last = true;
            self
        }

        pub fn call_count(&self) -> usize {
            *self.cursor.lock().unwrap()
        }

        fn next_step(&self) -> Result<ScriptStep, LlmError> {
            let mut cursor = self.cursor.lock().unwrap();
            let idx = *cursor;
            *cursor += 1;
            if let Some(step) = self.steps.get(idx) {
                return Ok(step.clone());
            }
            if self.repeat_last
                && let Some(last) = self.steps.last()
            {
                return Ok(last.clone());
            }
            Err(LlmError::Malformed("no more scripted responses".to_string()))
        }

        fn step_to_response(step: ScriptStep) -> Result<(Vec<StreamChunk>, CompletionResponse), LlmError> {
            match step {
                ScriptStep::Respond { chunks, content, usage } => {
                    Ok((chunks, CompletionResponse { content, usage }))
                }
                ScriptStep::RateLimited { retry_after } => Err(LlmError::RateLimited { retry_after }),
                ScriptStep::Timeout => Err(LlmError::Timeout(Duration::from_secs(300))),
                ScriptStep::Empty => Err(LlmError::EmptyResponse),
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let (_, response) = Self::step_to_response(self.next_step()?)?;
            Ok(response)
        }

        async fn stream(
            &self,
            _request: CompletionRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            let (chunks, response) = Self::step_to_response(self.next_step()?)?;
            for chunk in chunks {
                let _ = chunk_tx.send(chunk).await;
            }
            let _ = chunk_tx
                .send(StreamChunk::Done {
                    usage: response.usage.clone(),
                })
                .await;
            Ok(response)
        }
    }

}
