//! Deterministic mock LLM client for runner and relay tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{AiError, Result};

use super::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Role, StreamChunk,
    StreamResult, TokenUsage, ToolCall, ToolCallDelta,
};

/// Scripted step for one mock completion.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Return a plain assistant message; streamed as a single chunk.
    Text(String),
    /// Return an assistant message streamed as the given fragments.
    TextChunks(Vec<String>),
    /// Stream thinking fragments, then the final text.
    Thinking { thinking: Vec<String>, text: String },
    /// Return one tool call; streamed as chunked argument fragments.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Return an LLM error.
    Error(String),
}

impl MockStep {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn text_chunks(fragments: &[&str]) -> Self {
        Self::TextChunks(fragments.iter().map(|s| s.to_string()).collect())
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A deterministic mock LLM client driven by scripted steps.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    model: String,
    script: Arc<Mutex<VecDeque<MockStep>>>,
}

impl MockLlmClient {
    pub fn from_steps(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(Mutex::new(VecDeque::from(steps))),
        }
    }

    async fn next_step(&self) -> Option<MockStep> {
        self.script.lock().await.pop_front()
    }

    fn usage_for(content_len: usize) -> TokenUsage {
        let completion_tokens = content_len as u32;
        TokenUsage {
            prompt_tokens: 1,
            completion_tokens,
            total_tokens: 1 + completion_tokens,
        }
    }

    fn fallback_response(request: &CompletionRequest) -> CompletionResponse {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|msg| matches!(msg.role, Role::User))
            .map(|msg| format!("mock-echo: {}", msg.content))
            .unwrap_or_else(|| "mock-ok".to_string());

        CompletionResponse {
            content: Some(text.clone()),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: Some(Self::usage_for(text.len())),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let Some(step) = self.next_step().await else {
            return Ok(Self::fallback_response(&request));
        };

        match step {
            MockStep::Text(content) => Ok(CompletionResponse {
                usage: Some(Self::usage_for(content.len())),
                content: Some(content),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
            }),
            MockStep::TextChunks(fragments) => {
                let content = fragments.concat();
                Ok(CompletionResponse {
                    usage: Some(Self::usage_for(content.len())),
                    content: Some(content),
                    tool_calls: Vec::new(),
                    finish_reason: FinishReason::Stop,
                })
            }
            MockStep::Thinking { text, .. } => Ok(CompletionResponse {
                usage: Some(Self::usage_for(text.len())),
                content: Some(text),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
            }),
            MockStep::ToolCall {
                id,
                name,
                arguments,
            } => Ok(CompletionResponse {
                usage: Some(Self::usage_for(0)),
                content: None,
                tool_calls: vec![ToolCall {
                    id,
                    name,
                    arguments,
                }],
                finish_reason: FinishReason::ToolCalls,
            }),
            MockStep::Error(message) => Err(AiError::Llm(message)),
        }
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.clone();
        Box::pin(try_stream! {
            let Some(step) = client.next_step().await else {
                let response = MockLlmClient::fallback_response(&request);
                if let Some(content) = response.content {
                    yield StreamChunk::text(&content);
                }
                yield StreamChunk::final_chunk(FinishReason::Stop, response.usage);
                return;
            };

            match step {
                MockStep::Text(content) => {
                    yield StreamChunk::text(&content);
                    yield StreamChunk::final_chunk(
                        FinishReason::Stop,
                        Some(MockLlmClient::usage_for(content.len())),
                    );
                }
                MockStep::TextChunks(fragments) => {
                    let total: usize = fragments.iter().map(|f| f.len()).sum();
                    for fragment in fragments {
                        yield StreamChunk::text(&fragment);
                    }
                    yield StreamChunk::final_chunk(
                        FinishReason::Stop,
                        Some(MockLlmClient::usage_for(total)),
                    );
                }
                MockStep::Thinking { thinking, text } => {
                    for fragment in thinking {
                        yield StreamChunk::thinking(&fragment);
                    }
                    yield StreamChunk::text(&text);
                    yield StreamChunk::final_chunk(
                        FinishReason::Stop,
                        Some(MockLlmClient::usage_for(text.len())),
                    );
                }
                MockStep::ToolCall { id, name, arguments } => {
                    // Stream the arguments as two fragments, the way real
                    // providers chunk function-call JSON.
                    let json = serde_json::to_string(&arguments).unwrap_or_else(|_| "{}".into());
                    let mid = json.len() / 2;
                    yield StreamChunk {
                        tool_call_delta: Some(ToolCallDelta {
                            index: 0,
                            id: Some(id.clone()),
                            name: Some(name.clone()),
                            arguments: Some(json[..mid].to_string()),
                        }),
                        ..Default::default()
                    };
                    yield StreamChunk {
                        tool_call_delta: Some(ToolCallDelta {
                            index: 0,
                            id: Some(id),
                            name: Some(name),
                            arguments: Some(json[mid..].to_string()),
                        }),
                        ..Default::default()
                    };
                    yield StreamChunk::final_chunk(FinishReason::ToolCalls, None);
                }
                MockStep::Error(message) => {
                    Err(AiError::Llm(message))?;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::llm::{CompletionRequest, Message};

    #[tokio::test]
    async fn mock_client_returns_scripted_text() {
        let client = MockLlmClient::from_steps("mock-model", vec![MockStep::text("hello")]);

        let response = client
            .complete(CompletionRequest::new(vec![Message::user("ping")]))
            .await
            .expect("mock response should succeed");

        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn mock_client_streams_tool_call_in_chunks() {
        let client = MockLlmClient::from_steps(
            "mock-model",
            vec![MockStep::tool_call(
                "call-1",
                "search",
                serde_json::json!({"query": "plans"}),
            )],
        );

        let chunks = client
            .complete_stream(CompletionRequest::new(vec![Message::user("use tool")]))
            .try_collect::<Vec<_>>()
            .await
            .expect("stream should succeed");

        let deltas: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.tool_call_delta.as_ref())
            .collect();
        assert_eq!(deltas.len(), 2);
        let joined: String = deltas
            .iter()
            .filter_map(|d| d.arguments.clone())
            .collect();
        assert_eq!(
            serde_json::from_str::<Value>(&joined).unwrap(),
            serde_json::json!({"query": "plans"})
        );
    }

    #[tokio::test]
    async fn mock_client_streams_thinking_before_text() {
        let client = MockLlmClient::from_steps(
            "mock-model",
            vec![MockStep::Thinking {
                thinking: vec!["plan ".into(), "it".into()],
                text: "done".into(),
            }],
        );

        let chunks = client
            .complete_stream(CompletionRequest::new(vec![Message::user("hi")]))
            .try_collect::<Vec<_>>()
            .await
            .expect("stream should succeed");

        assert_eq!(chunks[0].thinking.as_deref(), Some("plan "));
        assert_eq!(chunks[1].thinking.as_deref(), Some("it"));
        assert_eq!(chunks[2].text, "done");
    }
}
