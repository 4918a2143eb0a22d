//! Tool-call aggregation over streamed fragments.

use std::collections::BTreeMap;

use futures::StreamExt;
use serde_json::Value;

use crate::agent::event::{EventStream, TokenPayload};
use crate::error::{AiError, Result};
use crate::llm::{ToolCall, ToolCallDelta};

#[derive(Debug, Clone)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments_json: String,
}

/// Accumulates chunked tool-call fragments keyed by index.
///
/// The call id and name arrive once per index and the first seen value wins;
/// argument fragments concatenate in arrival order.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    builders: BTreeMap<usize, ToolCallBuilder>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    pub fn accumulate(&mut self, delta: &ToolCallDelta) {
        let builder = self
            .builders
            .entry(delta.index)
            .or_insert_with(|| ToolCallBuilder {
                id: String::new(),
                name: String::new(),
                arguments_json: String::new(),
            });

        if let Some(id) = &delta.id
            && builder.id.is_empty()
        {
            builder.id = id.clone();
        }

        if let Some(name) = &delta.name
            && builder.name.is_empty()
        {
            builder.name = name.clone();
        }

        if let Some(args) = &delta.arguments {
            builder.arguments_json.push_str(args);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    pub fn finalize(self) -> Vec<ToolCall> {
        self.builders
            .into_values()
            .map(|builder| ToolCall {
                id: builder.id,
                name: builder.name,
                arguments: parse_arguments(&builder.arguments_json),
            })
            .collect()
    }
}

fn parse_arguments(json: &str) -> Value {
    if json.trim().is_empty() {
        return Value::Null;
    }
    match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                json_len = json.len(),
                error = %e,
                "Failed to parse tool call arguments, passing empty object"
            );
            Value::Object(serde_json::Map::new())
        }
    }
}

/// Aggregate one logical tool-call group starting from `trigger`.
///
/// A trigger already carrying complete calls consumes no further events.
/// A chunk trigger consumes chunk events from `events` until the first
/// non-chunk event; that terminal event marks the chunk boundary and is
/// dropped, not handed back to the caller's loop.
///
/// Any other trigger payload is a malformed token and fails the turn.
pub async fn aggregate_tool_calls(
    trigger: TokenPayload,
    events: &mut EventStream,
) -> Result<Vec<ToolCall>> {
    match trigger {
        TokenPayload::ToolCalls(calls) => Ok(calls),
        TokenPayload::ToolCallChunk(delta) => {
            let mut acc = ToolCallAccumulator::new();
            acc.accumulate(&delta);

            while let Some(event) = events.next().await {
                match event?.payload {
                    TokenPayload::ToolCallChunk(delta) => acc.accumulate(&delta),
                    _ => break,
                }
            }

            Ok(acc.finalize())
        }
        other => Err(AiError::MalformedToken(format!(
            "expected tool calls or chunks, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::event::AgentEvent;

    fn chunk(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: Some(args.to_string()),
        }
    }

    fn stream_of(events: Vec<AgentEvent>) -> EventStream {
        Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
    }

    #[test]
    fn accumulator_concatenates_fragments() {
        let mut acc = ToolCallAccumulator::new();
        acc.accumulate(&chunk(0, Some("call_1"), Some("search"), "{\"a\":"));
        acc.accumulate(&chunk(0, None, None, "1}"));

        let calls = acc.finalize();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, serde_json::json!({"a": 1}));
    }

    #[test]
    fn accumulator_interleaves_indices() {
        let mut acc = ToolCallAccumulator::new();
        acc.accumulate(&chunk(0, Some("call_1"), Some("one"), "{\"a\":"));
        acc.accumulate(&chunk(1, Some("call_2"), Some("two"), "{\"b\":"));
        acc.accumulate(&chunk(0, None, None, "1}"));
        acc.accumulate(&chunk(1, None, None, "2}"));

        let calls = acc.finalize();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "one");
        assert_eq!(calls[1].name, "two");
    }

    #[test]
    fn accumulator_keeps_first_seen_identity() {
        let mut acc = ToolCallAccumulator::new();
        acc.accumulate(&chunk(0, Some("call_1"), Some("search"), ""));
        acc.accumulate(&chunk(0, Some("call_9"), Some("other"), "{}"));

        let calls = acc.finalize();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "search");
    }

    #[test]
    fn accumulator_degrades_malformed_arguments_to_empty_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.accumulate(&chunk(0, Some("call_1"), Some("search"), "{\"a\": oops"));

        let calls = acc.finalize();
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }

    #[tokio::test]
    async fn complete_calls_consume_no_further_events() {
        let calls = vec![ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            arguments: serde_json::json!({"query": "q"}),
        }];
        let mut events = stream_of(vec![AgentEvent::text("agent", "next")]);

        let result = aggregate_tool_calls(TokenPayload::ToolCalls(calls.clone()), &mut events)
            .await
            .expect("aggregation should succeed");

        assert_eq!(result, calls);
        // The following event is still available to the caller.
        let next = events.next().await.unwrap().unwrap();
        assert_eq!(next, AgentEvent::text("agent", "next"));
    }

    #[tokio::test]
    async fn chunk_aggregation_consumes_until_non_chunk() {
        let mut events = stream_of(vec![
            AgentEvent::tool_call_chunk("agent", chunk(0, None, None, "1}")),
            AgentEvent::empty("agent"),
            AgentEvent::text("agent", "after"),
        ]);

        let result = aggregate_tool_calls(
            TokenPayload::ToolCallChunk(chunk(0, Some("call_1"), Some("search"), "{\"a\":")),
            &mut events,
        )
        .await
        .expect("aggregation should succeed");

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].arguments, serde_json::json!({"a": 1}));

        // The empty boundary event was dropped; the text event remains.
        let next = events.next().await.unwrap().unwrap();
        assert_eq!(next, AgentEvent::text("agent", "after"));
    }

    #[tokio::test]
    async fn aggregation_rejects_malformed_trigger() {
        let mut events = stream_of(vec![]);
        let err = aggregate_tool_calls(TokenPayload::Empty, &mut events)
            .await
            .expect_err("empty trigger should be rejected");
        assert!(matches!(err, AiError::MalformedToken(_)));
    }
}
