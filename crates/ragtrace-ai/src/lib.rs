//! ragtrace-ai - Agent framework for the ragtrace demo
//!
//! This crate provides:
//! - Streaming relay: projects per-turn agent events into UI updates
//! - Tool-call aggregation over chunked streaming fragments
//! - Agent runner with per-thread checkpointing
//! - Multi-provider LLM client (OpenAI-compatible, Anthropic)
//! - Tool registry and execution
//! - Embedding providers and offline evaluation

pub mod agent;
pub mod embedding;
pub mod error;
pub mod eval;
mod http;
pub mod llm;
pub mod tools;

// Re-export commonly used types
pub use agent::{
    AgentConfig, AgentEvent, AgentRunner, ChannelSink, Checkpointer, EventStream,
    MemoryCheckpointer, MessageSink, NullSink, StreamingRelay, TokenPayload, ToolCallAccumulator,
    TurnRequest, UiEvent,
};
pub use embedding::{EmbeddingConfig, EmbeddingProvider, OpenAIEmbedding};
pub use error::{AiError, Result};
pub use eval::{Dataset, DatasetItem, EvalReport, EvalRunner, Feedback, TurnEvaluator};
pub use llm::{
    AnthropicClient, CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message,
    OpenAIClient, Role, StreamChunk, StreamResult, TokenUsage, ToolCall, ToolCallDelta,
};
pub use tools::{Tool, ToolOutput, ToolRegistry, ToolSchema};
