//! Streaming relay: projects one turn's event stream into UI updates.
//!
//! Drains a single-pass [`EventStream`] and demultiplexes it into display
//! message updates, thinking steps, tool-call steps, and tool-response
//! steps, preserving arrival order. One relay invocation per turn; the
//! invocation exclusively owns the sink and the history it appends to.

use futures::StreamExt;
use serde_json::Value;

use crate::agent::event::{AgentEvent, EventStream, TokenPayload};
use crate::agent::sink::MessageSink;
use crate::agent::stream::aggregate_tool_calls;
use crate::error::Result;
use crate::llm::{Message, ToolCall};

/// Opens a thinking sub-loop when it arrives as a whole text token.
pub const THINK_OPEN: &str = "<think>";
/// Closes the thinking sub-loop; the closing event is consumed.
pub const THINK_CLOSE: &str = "</think>";

/// Relay consumer state. Only one state holds the cursor at a time;
/// `Thinking` and `AggregatingToolCall` consume events the outer
/// dispatch never sees.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RelayState {
    /// No display message open.
    Idle,
    /// A display message is open and accepting text.
    Streaming,
    /// Inside a `<think>` span; content goes to the thinking step.
    Thinking,
    /// Consuming tool-call chunks until the chunk boundary.
    AggregatingToolCall,
}

/// Single-turn streaming relay.
///
/// Not restartable: construct a fresh relay per turn.
pub struct StreamingRelay<'a> {
    sink: &'a mut dyn MessageSink,
    history: &'a mut Vec<Message>,
    state: RelayState,
    last_node: String,
    message: Option<String>,
}

impl<'a> StreamingRelay<'a> {
    pub fn new(sink: &'a mut dyn MessageSink, history: &'a mut Vec<Message>) -> Self {
        Self {
            sink,
            history,
            state: RelayState::Idle,
            last_node: String::new(),
            message: None,
        }
    }

    /// Drain the event stream to exhaustion, emitting UI updates in
    /// arrival order. Errors from the stream or from aggregation
    /// propagate immediately and leave any open message unflushed.
    pub async fn run(mut self, mut events: EventStream) -> Result<()> {
        while let Some(event) = events.next().await {
            let event = event?;

            if self.state == RelayState::Thinking {
                self.consume_thinking(&event).await;
                continue;
            }

            self.dispatch(event, &mut events).await?;
        }

        if self.state == RelayState::Thinking {
            self.sink.thinking_complete().await;
        }
        self.flush_message().await;
        Ok(())
    }

    async fn dispatch(&mut self, event: AgentEvent, events: &mut EventStream) -> Result<()> {
        if event.node != self.last_node {
            self.flush_message().await;
        }

        match event.payload {
            TokenPayload::Text(content) if !content.is_empty() => {
                if content == THINK_OPEN {
                    self.sink.thinking_started().await;
                    self.state = RelayState::Thinking;
                } else if event.node.contains("tools") {
                    self.sink
                        .tool_response(&format!("```\n{content}\n```"))
                        .await;
                } else {
                    if self.message.is_none() {
                        self.message = Some(String::new());
                        self.state = RelayState::Streaming;
                    }
                    if let Some(message) = self.message.as_mut() {
                        message.push_str(&content);
                    }
                    self.sink.message_token(&content).await;
                }
            }
            payload @ (TokenPayload::ToolCalls(_) | TokenPayload::ToolCallChunk(_)) => {
                self.state = RelayState::AggregatingToolCall;
                let calls = aggregate_tool_calls(payload, events).await?;
                self.state = self.resting_state();
                self.sink.tool_calls(&render_tool_calls(&calls)?).await;
            }
            _ => {}
        }

        self.last_node = event.node;
        Ok(())
    }

    /// Thinking sub-loop body: stream content into the thinking step
    /// until the closing sentinel, which is consumed and not otherwise
    /// processed. Non-text payloads inside the span are ignored.
    async fn consume_thinking(&mut self, event: &AgentEvent) {
        if let TokenPayload::Text(content) = &event.payload {
            if content == THINK_CLOSE {
                self.sink.thinking_complete().await;
                self.state = self.resting_state();
            } else if !content.is_empty() {
                self.sink.thinking_token(content).await;
            }
        }
    }

    /// Finalize the open display message exactly once: flush to the
    /// sink and append to the externally-owned history.
    async fn flush_message(&mut self) {
        if let Some(text) = self.message.take() {
            self.sink.message_complete(&text).await;
            self.history.push(Message::assistant(text));
            self.state = RelayState::Idle;
        }
    }

    fn resting_state(&self) -> RelayState {
        if self.message.is_some() {
            RelayState::Streaming
        } else {
            RelayState::Idle
        }
    }
}

/// Render aggregated calls as a JSON list of `{name, args}`.
fn render_tool_calls(calls: &[ToolCall]) -> Result<String> {
    let rendered: Vec<Value> = calls
        .iter()
        .map(|call| {
            serde_json::json!({
                "name": call.name,
                "args": call.arguments,
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&rendered)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::sink::{RecordingSink, UiEvent};
    use crate::error::AiError;
    use crate::llm::ToolCallDelta;

    fn stream_of(events: Vec<AgentEvent>) -> EventStream {
        Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
    }

    fn chunk(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: Some(args.to_string()),
        }
    }

    async fn run_relay(events: Vec<AgentEvent>) -> (Vec<UiEvent>, Vec<Message>) {
        let mut sink = RecordingSink::default();
        let mut history = Vec::new();
        StreamingRelay::new(&mut sink, &mut history)
            .run(stream_of(events))
            .await
            .expect("relay should succeed");
        (sink.events, history)
    }

    #[tokio::test]
    async fn single_node_opens_one_message_with_fragments_in_order() {
        let (events, history) = run_relay(vec![
            AgentEvent::text("agent", "Hello "),
            AgentEvent::text("agent", "wor"),
            AgentEvent::text("agent", "ld"),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                UiEvent::MessageToken("Hello ".into()),
                UiEvent::MessageToken("wor".into()),
                UiEvent::MessageToken("ld".into()),
                UiEvent::MessageComplete("Hello world".into()),
            ]
        );
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hello world");
    }

    #[tokio::test]
    async fn node_change_finalizes_before_new_message() {
        let (events, history) = run_relay(vec![
            AgentEvent::text("agent", "first"),
            AgentEvent::text("reviser", "second"),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                UiEvent::MessageToken("first".into()),
                UiEvent::MessageComplete("first".into()),
                UiEvent::MessageToken("second".into()),
                UiEvent::MessageComplete("second".into()),
            ]
        );
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn chunked_tool_call_renders_parsed_args() {
        let (events, _) = run_relay(vec![
            AgentEvent::tool_call_chunk(
                "agent",
                chunk(0, Some("call_1"), Some("search"), "{\"a\":"),
            ),
            AgentEvent::tool_call_chunk("agent", chunk(0, None, None, "1}")),
            AgentEvent::empty("agent"),
        ])
        .await;

        let UiEvent::ToolCalls(rendered) = &events[0] else {
            panic!("expected tool-calls step, got {:?}", events[0]);
        };
        let parsed: Value = serde_json::from_str(rendered).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([{"name": "search", "args": {"a": 1}}])
        );
    }

    #[tokio::test]
    async fn complete_tool_calls_consume_exactly_one_event() {
        let calls = vec![ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            arguments: serde_json::json!({"query": "q"}),
        }];
        let (events, _) = run_relay(vec![
            AgentEvent::tool_calls("agent", calls),
            AgentEvent::text("agent", "after"),
        ])
        .await;

        // The event after the complete tool_calls token still reaches
        // the outer loop.
        assert!(matches!(events[0], UiEvent::ToolCalls(_)));
        assert_eq!(events[1], UiEvent::MessageToken("after".into()));
        assert_eq!(events[2], UiEvent::MessageComplete("after".into()));
    }

    #[tokio::test]
    async fn aggregation_drops_terminal_event() {
        let (events, _) = run_relay(vec![
            AgentEvent::tool_call_chunk(
                "agent",
                chunk(0, Some("call_1"), Some("search"), "{}"),
            ),
            // Chunk boundary: this text event is consumed by aggregation
            // and never rendered.
            AgentEvent::text("agent", "lost"),
            AgentEvent::text("agent", "kept"),
        ])
        .await;

        assert!(matches!(events[0], UiEvent::ToolCalls(_)));
        assert_eq!(events[1], UiEvent::MessageToken("kept".into()));
        assert!(!events.contains(&UiEvent::MessageToken("lost".into())));
    }

    #[tokio::test]
    async fn thinking_span_streams_into_one_step() {
        let (events, history) = run_relay(vec![
            AgentEvent::text("agent", THINK_OPEN),
            AgentEvent::text("agent", "step one "),
            AgentEvent::text("agent", "step two"),
            AgentEvent::text("agent", THINK_CLOSE),
            AgentEvent::text("agent", "answer"),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                UiEvent::ThinkingStarted,
                UiEvent::ThinkingToken("step one ".into()),
                UiEvent::ThinkingToken("step two".into()),
                UiEvent::ThinkingComplete,
                UiEvent::MessageToken("answer".into()),
                UiEvent::MessageComplete("answer".into()),
            ]
        );
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "answer");
    }

    #[tokio::test]
    async fn thinking_span_closed_at_stream_end() {
        let (events, _) = run_relay(vec![
            AgentEvent::text("agent", THINK_OPEN),
            AgentEvent::text("agent", "unfinished"),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                UiEvent::ThinkingStarted,
                UiEvent::ThinkingToken("unfinished".into()),
                UiEvent::ThinkingComplete,
            ]
        );
    }

    #[tokio::test]
    async fn tool_node_content_renders_as_fenced_response() {
        let (events, history) = run_relay(vec![
            AgentEvent::text("agent", "Hello "),
            AgentEvent::text("agent", "world"),
            AgentEvent::text("tools", "{\"result\": \"success\"}"),
            AgentEvent::text("agent", "Done"),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                UiEvent::MessageToken("Hello ".into()),
                UiEvent::MessageToken("world".into()),
                UiEvent::MessageComplete("Hello world".into()),
                UiEvent::ToolResponse("```\n{\"result\": \"success\"}\n```".into()),
                UiEvent::MessageToken("Done".into()),
                UiEvent::MessageComplete("Done".into()),
            ]
        );
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "Hello world");
        assert_eq!(history[1].content, "Done");
    }

    #[tokio::test]
    async fn substring_match_treats_nested_tool_nodes_as_responses() {
        let (events, _) = run_relay(vec![AgentEvent::text("wiki_tools", "payload")]).await;

        assert_eq!(events, vec![UiEvent::ToolResponse("```\npayload\n```".into())]);
    }

    #[tokio::test]
    async fn empty_payloads_only_signal_node_changes() {
        let (events, _) = run_relay(vec![
            AgentEvent::text("agent", "text"),
            AgentEvent::empty("tools"),
            AgentEvent::empty("tools"),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                UiEvent::MessageToken("text".into()),
                UiEvent::MessageComplete("text".into()),
            ]
        );
    }

    #[tokio::test]
    async fn upstream_error_leaves_message_unflushed() {
        let mut sink = RecordingSink::default();
        let mut history = Vec::new();
        let events: EventStream = Box::pin(futures::stream::iter(vec![
            Ok(AgentEvent::text("agent", "partial")),
            Err(AiError::Llm("upstream failure".into())),
        ]));

        let err = StreamingRelay::new(&mut sink, &mut history)
            .run(events)
            .await
            .expect_err("stream error should propagate");

        assert!(matches!(err, AiError::Llm(_)));
        assert_eq!(sink.events, vec![UiEvent::MessageToken("partial".into())]);
        assert!(history.is_empty());
    }
}
