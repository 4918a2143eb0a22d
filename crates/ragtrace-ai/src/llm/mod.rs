//! LLM provider abstraction and implementations

pub mod anthropic;
pub mod client;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, Role, StreamChunk,
    StreamResult, TokenUsage, ToolCall, ToolCallDelta,
};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockLlmClient, MockStep};
pub use openai::OpenAIClient;
