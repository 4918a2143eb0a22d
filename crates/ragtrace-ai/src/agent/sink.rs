//! UI message/step sink for relay output.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One UI update produced by the relay, drained by a front end.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Incremental text for the open display message.
    MessageToken(String),
    /// The open display message is finalized with this full text.
    MessageComplete(String),
    ThinkingStarted,
    ThinkingToken(String),
    ThinkingComplete,
    /// One-shot step: JSON-formatted list of aggregated tool calls.
    ToolCalls(String),
    /// One-shot step: tool response rendered as a fenced code block.
    ToolResponse(String),
}

/// Sink for the relay's ordered UI side effects.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn message_token(&mut self, text: &str);
    async fn message_complete(&mut self, full_text: &str);
    async fn thinking_started(&mut self);
    async fn thinking_token(&mut self, text: &str);
    async fn thinking_complete(&mut self);
    async fn tool_calls(&mut self, rendered: &str);
    async fn tool_response(&mut self, rendered: &str);
}

/// Sink that discards everything, for headless runs.
pub struct NullSink;

#[async_trait]
impl MessageSink for NullSink {
    async fn message_token(&mut self, _text: &str) {}
    async fn message_complete(&mut self, _full_text: &str) {}
    async fn thinking_started(&mut self) {}
    async fn thinking_token(&mut self, _text: &str) {}
    async fn thinking_complete(&mut self) {}
    async fn tool_calls(&mut self, _rendered: &str) {}
    async fn tool_response(&mut self, _rendered: &str) {}
}

/// Sink that forwards updates over an mpsc channel.
///
/// Send errors are ignored: a closed receiver means the front end went away,
/// which must not fail the turn.
pub struct ChannelSink {
    tx: mpsc::Sender<UiEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<UiEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn message_token(&mut self, text: &str) {
        let _ = self.tx.send(UiEvent::MessageToken(text.to_string())).await;
    }

    async fn message_complete(&mut self, full_text: &str) {
        let _ = self
            .tx
            .send(UiEvent::MessageComplete(full_text.to_string()))
            .await;
    }

    async fn thinking_started(&mut self) {
        let _ = self.tx.send(UiEvent::ThinkingStarted).await;
    }

    async fn thinking_token(&mut self, text: &str) {
        let _ = self.tx.send(UiEvent::ThinkingToken(text.to_string())).await;
    }

    async fn thinking_complete(&mut self) {
        let _ = self.tx.send(UiEvent::ThinkingComplete).await;
    }

    async fn tool_calls(&mut self, rendered: &str) {
        let _ = self.tx.send(UiEvent::ToolCalls(rendered.to_string())).await;
    }

    async fn tool_response(&mut self, rendered: &str) {
        let _ = self
            .tx
            .send(UiEvent::ToolResponse(rendered.to_string()))
            .await;
    }
}

/// Sink that records every update in order, for tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<UiEvent>,
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl MessageSink for RecordingSink {
    async fn message_token(&mut self, text: &str) {
        self.events.push(UiEvent::MessageToken(text.to_string()));
    }

    async fn message_complete(&mut self, full_text: &str) {
        self.events
            .push(UiEvent::MessageComplete(full_text.to_string()));
    }

    async fn thinking_started(&mut self) {
        self.events.push(UiEvent::ThinkingStarted);
    }

    async fn thinking_token(&mut self, text: &str) {
        self.events.push(UiEvent::ThinkingToken(text.to_string()));
    }

    async fn thinking_complete(&mut self) {
        self.events.push(UiEvent::ThinkingComplete);
    }

    async fn tool_calls(&mut self, rendered: &str) {
        self.events.push(UiEvent::ToolCalls(rendered.to_string()));
    }

    async fn tool_response(&mut self, rendered: &str) {
        self.events.push(UiEvent::ToolResponse(rendered.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_forwards_updates() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sink = ChannelSink::new(tx);

        sink.message_token("hello").await;
        sink.message_complete("hello").await;
        sink.tool_response("```\nok\n```").await;

        assert_eq!(
            rx.recv().await.unwrap(),
            UiEvent::MessageToken("hello".into())
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            UiEvent::MessageComplete("hello".into())
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            UiEvent::ToolResponse("```\nok\n```".into())
        );
    }

    #[tokio::test]
    async fn channel_sink_survives_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        sink.message_token("dropped").await;
    }
}
