//! Per-turn event model shared by the runner and the streaming relay.

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;
use crate::llm::{ToolCall, ToolCallDelta};

/// Content carried by one agent event, decided once at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenPayload {
    /// A text fragment (includes the `<think>`/`</think>` sentinels).
    Text(String),
    /// Fully-formed tool calls.
    ToolCalls(Vec<ToolCall>),
    /// A partial tool-call fragment; siblings share an index.
    ToolCallChunk(ToolCallDelta),
    /// No content (e.g. a finish marker).
    Empty,
}

impl TokenPayload {
    pub fn is_chunk(&self) -> bool {
        matches!(self, TokenPayload::ToolCallChunk(_))
    }
}

/// One event from the agent's streaming output for a single turn.
///
/// `node` identifies the producing graph stage (`"agent"` for model output,
/// `"tools"` for tool responses) and is used verbatim as the node-change
/// signal by the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentEvent {
    pub node: String,
    pub payload: TokenPayload,
}

impl AgentEvent {
    pub fn text(node: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            payload: TokenPayload::Text(content.into()),
        }
    }

    pub fn tool_calls(node: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            node: node.into(),
            payload: TokenPayload::ToolCalls(calls),
        }
    }

    pub fn tool_call_chunk(node: impl Into<String>, delta: ToolCallDelta) -> Self {
        Self {
            node: node.into(),
            payload: TokenPayload::ToolCallChunk(delta),
        }
    }

    pub fn empty(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            payload: TokenPayload::Empty,
        }
    }
}

/// Ordered, finite, single-pass event sequence for one turn.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>;
