//! Agent turn runner: the model/tool loop behind the event stream.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::agent::event::{AgentEvent, EventStream};
use crate::agent::relay::{THINK_CLOSE, THINK_OPEN};
use crate::agent::stream::ToolCallAccumulator;
use crate::agent::thread::Checkpointer;
use crate::error::{AiError, Result};
use crate::llm::{CompletionRequest, LlmClient, Message};
use crate::tools::{ToolOutput, ToolRegistry};

/// Node identifier for model output events.
const NODE_AGENT: &str = "agent";
/// Node identifier for tool response events.
const NODE_TOOLS: &str = "tools";

/// Static per-runner configuration, constructed once and passed in.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub max_iterations: usize,
    pub max_tokens: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            temperature: None,
            max_iterations: 10,
            max_tokens: None,
        }
    }
}

/// One user turn: the input plus its thread and user identity.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub content: String,
    pub thread_id: String,
    pub user: Option<String>,
}

impl TurnRequest {
    pub fn new(content: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            thread_id: thread_id.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Runs agent turns: loads the thread, interleaves model and tool calls,
/// emits the ordered per-turn event stream, and persists the thread.
#[derive(Clone)]
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    checkpointer: Arc<dyn Checkpointer>,
    config: AgentConfig,
}

impl AgentRunner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        checkpointer: Arc<dyn Checkpointer>,
        config: AgentConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            checkpointer,
            config,
        }
    }

    /// Run one turn, emitting events as they are produced.
    ///
    /// The returned stream is finite and single-pass. A runner error is
    /// forwarded as the final `Err` item. Dropping the stream cancels
    /// the turn mid-flight.
    pub fn stream_turn(&self, request: TurnRequest) -> EventStream {
        let (tx, mut rx) = mpsc::channel::<Result<AgentEvent>>(128);
        let runner = self.clone();

        tokio::spawn(async move {
            let turn = runner.run_turn(request, &tx);
            tokio::pin!(turn);
            let result = tokio::select! {
                result = &mut turn => result,
                _ = tx.closed() => return,
            };
            if let Err(error) = result {
                let _ = tx.send(Err(error)).await;
            }
        });

        Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    /// Run one turn to completion and return the full transcript.
    /// Used by batch evaluation, where no front end drains events.
    pub async fn invoke(&self, request: TurnRequest) -> Result<Vec<Message>> {
        let (tx, mut rx) = mpsc::channel::<Result<AgentEvent>>(128);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let result = self.run_turn(request, &tx).await;
        drop(tx);
        let _ = drain.await;
        result
    }

    async fn run_turn(
        &self,
        request: TurnRequest,
        tx: &mpsc::Sender<Result<AgentEvent>>,
    ) -> Result<Vec<Message>> {
        let mut messages = self
            .checkpointer
            .load(&request.thread_id)
            .await?
            .unwrap_or_default();

        if messages.is_empty() && !self.config.system_prompt.is_empty() {
            messages.push(Message::system(&self.config.system_prompt));
        }
        messages.push(Message::user(&request.content));

        for iteration in 0..self.config.max_iterations {
            tracing::debug!(
                thread_id = %request.thread_id,
                iteration,
                "Requesting completion"
            );

            let mut completion_request = CompletionRequest::new(messages.clone())
                .with_tools(self.tools.schemas());
            if let Some(temperature) = self.config.temperature {
                completion_request = completion_request.with_temperature(temperature);
            }
            if let Some(max_tokens) = self.config.max_tokens {
                completion_request = completion_request.with_max_tokens(max_tokens);
            }

            let (text, tool_calls) = self.drain_completion(completion_request, tx).await?;

            if tool_calls.is_empty() {
                messages.push(Message::assistant(text));
                self.checkpointer.save(&request.thread_id, &messages).await?;
                return Ok(messages);
            }

            let content = if text.is_empty() { None } else { Some(text) };
            messages.push(Message::assistant_with_tool_calls(
                content,
                tool_calls.clone(),
            ));

            for call in tool_calls {
                tracing::debug!(tool = %call.name, id = %call.id, "Executing tool");
                let output = match self.tools.execute(&call.name, call.arguments.clone()).await
                {
                    Ok(output) => output,
                    Err(error) => ToolOutput::error(error.to_string()),
                };
                let rendered = output.as_llm_content();
                send(tx, AgentEvent::text(NODE_TOOLS, &rendered)).await;
                messages.push(Message::tool_result(&call.id, rendered));
            }
        }

        Err(AiError::MaxIterations(self.config.max_iterations))
    }

    /// Drain one streaming completion, forwarding chunks as events.
    ///
    /// Provider thinking deltas are bridged onto the sentinel protocol so
    /// downstream consumers see a single text-based shape. After chunked
    /// tool-call fragments, an empty boundary event marks the end of the
    /// group.
    async fn drain_completion(
        &self,
        request: CompletionRequest,
        tx: &mpsc::Sender<Result<AgentEvent>>,
    ) -> Result<(String, Vec<crate::llm::ToolCall>)> {
        let mut stream = self.llm.complete_stream(request);
        let mut text = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut thinking_open = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            if let Some(thinking) = &chunk.thinking
                && !thinking.is_empty()
            {
                if !thinking_open {
                    send(tx, AgentEvent::text(NODE_AGENT, THINK_OPEN)).await;
                    thinking_open = true;
                }
                send(tx, AgentEvent::text(NODE_AGENT, thinking)).await;
            }

            if !chunk.text.is_empty() {
                if thinking_open {
                    send(tx, AgentEvent::text(NODE_AGENT, THINK_CLOSE)).await;
                    thinking_open = false;
                }
                text.push_str(&chunk.text);
                send(tx, AgentEvent::text(NODE_AGENT, &chunk.text)).await;
            }

            if let Some(delta) = chunk.tool_call_delta {
                accumulator.accumulate(&delta);
                send(tx, AgentEvent::tool_call_chunk(NODE_AGENT, delta)).await;
            }
        }

        if thinking_open {
            send(tx, AgentEvent::text(NODE_AGENT, THINK_CLOSE)).await;
        }

        // Chunk boundary for downstream aggregation.
        if !accumulator.is_empty() {
            send(tx, AgentEvent::empty(NODE_AGENT)).await;
        }

        Ok((text, accumulator.finalize()))
    }
}

async fn send(tx: &mpsc::Sender<Result<AgentEvent>>, event: AgentEvent) {
    let _ = tx.send(Ok(event)).await;
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::agent::event::TokenPayload;
    use crate::agent::relay::StreamingRelay;
    use crate::agent::sink::{RecordingSink, UiEvent};
    use crate::agent::thread::MemoryCheckpointer;
    use crate::llm::{MockLlmClient, MockStep, Role};
    use crate::tools::Tool;

    struct LookupTool;

    #[async_trait]
    impl Tool for LookupTool {
        fn name(&self) -> &str {
            "lookup"
        }

        fn description(&self) -> &str {
            "Look up a document"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        }

        async fn execute(&self, input: Value) -> crate::error::Result<ToolOutput> {
            Ok(ToolOutput::success(serde_json::json!({
                "documents": [format!("doc for {}", input["query"].as_str().unwrap_or(""))]
            })))
        }
    }

    fn runner_with(llm: MockLlmClient, config: AgentConfig) -> AgentRunner {
        let mut tools = ToolRegistry::new();
        tools.register(LookupTool);
        AgentRunner::new(
            Arc::new(llm),
            Arc::new(tools),
            Arc::new(MemoryCheckpointer::new()),
            config,
        )
    }

    async fn collect(stream: EventStream) -> Vec<AgentEvent> {
        use futures::TryStreamExt;
        stream.try_collect().await.expect("turn should succeed")
    }

    #[tokio::test]
    async fn plain_turn_streams_text_and_persists_thread() {
        let llm = MockLlmClient::from_steps(
            "mock-model",
            vec![MockStep::text_chunks(&["Hel", "lo"])],
        );
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let runner = AgentRunner::new(
            Arc::new(llm),
            Arc::new(ToolRegistry::new()),
            checkpointer.clone(),
            AgentConfig {
                system_prompt: "be helpful".into(),
                ..Default::default()
            },
        );

        let events = collect(runner.stream_turn(TurnRequest::new("hi", "t1"))).await;
        assert_eq!(
            events,
            vec![
                AgentEvent::text("agent", "Hel"),
                AgentEvent::text("agent", "lo"),
            ]
        );

        let thread = checkpointer.load("t1").await.unwrap().unwrap();
        assert_eq!(thread.len(), 3);
        assert_eq!(thread[0].role, Role::System);
        assert_eq!(thread[2].content, "Hello");
    }

    #[tokio::test]
    async fn tool_turn_emits_chunks_boundary_and_response() {
        let llm = MockLlmClient::from_steps(
            "mock-model",
            vec![
                MockStep::tool_call("call-1", "lookup", serde_json::json!({"query": "plans"})),
                MockStep::text("Done"),
            ],
        );
        let runner = runner_with(llm, AgentConfig::default());

        let events = collect(runner.stream_turn(TurnRequest::new("find plans", "t1"))).await;

        let chunk_count = events
            .iter()
            .filter(|e| e.payload.is_chunk())
            .count();
        assert_eq!(chunk_count, 2);

        // Boundary event after the chunk group, then the tool response.
        let boundary = events
            .iter()
            .position(|e| e.payload == TokenPayload::Empty)
            .expect("boundary event present");
        let response = events
            .iter()
            .position(|e| e.node == "tools")
            .expect("tool response present");
        assert!(boundary < response);
        assert_eq!(events.last(), Some(&AgentEvent::text("agent", "Done")));
    }

    #[tokio::test]
    async fn thinking_deltas_are_bridged_to_sentinels() {
        let llm = MockLlmClient::from_steps(
            "mock-model",
            vec![MockStep::Thinking {
                thinking: vec!["plan ".into(), "it".into()],
                text: "answer".into(),
            }],
        );
        let runner = runner_with(llm, AgentConfig::default());

        let events = collect(runner.stream_turn(TurnRequest::new("hi", "t1"))).await;
        assert_eq!(
            events,
            vec![
                AgentEvent::text("agent", THINK_OPEN),
                AgentEvent::text("agent", "plan "),
                AgentEvent::text("agent", "it"),
                AgentEvent::text("agent", THINK_CLOSE),
                AgentEvent::text("agent", "answer"),
            ]
        );
    }

    #[tokio::test]
    async fn iteration_cap_fails_the_turn() {
        let llm = MockLlmClient::from_steps(
            "mock-model",
            vec![
                MockStep::tool_call("call-1", "lookup", serde_json::json!({"query": "a"})),
                MockStep::tool_call("call-2", "lookup", serde_json::json!({"query": "b"})),
            ],
        );
        let runner = runner_with(
            llm,
            AgentConfig {
                max_iterations: 1,
                ..Default::default()
            },
        );

        use futures::TryStreamExt;
        let result: std::result::Result<Vec<_>, _> = runner
            .stream_turn(TurnRequest::new("loop", "t1"))
            .try_collect()
            .await;
        assert!(matches!(result, Err(AiError::MaxIterations(1))));
    }

    #[tokio::test]
    async fn invoke_returns_full_transcript() {
        let llm = MockLlmClient::from_steps(
            "mock-model",
            vec![
                MockStep::tool_call("call-1", "lookup", serde_json::json!({"query": "plans"})),
                MockStep::text("Done"),
            ],
        );
        let runner = runner_with(llm, AgentConfig::default());

        let transcript = runner
            .invoke(TurnRequest::new("find plans", "t1"))
            .await
            .expect("turn should succeed");

        let roles: Vec<_> = transcript.iter().map(|m| m.role.clone()).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(transcript.last().unwrap().content, "Done");
    }

    #[tokio::test]
    async fn turns_on_one_thread_share_state() {
        let llm = MockLlmClient::from_steps(
            "mock-model",
            vec![MockStep::text("first"), MockStep::text("second")],
        );
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let runner = AgentRunner::new(
            Arc::new(llm),
            Arc::new(ToolRegistry::new()),
            checkpointer.clone(),
            AgentConfig::default(),
        );

        runner.invoke(TurnRequest::new("one", "t1")).await.unwrap();
        runner.invoke(TurnRequest::new("two", "t1")).await.unwrap();

        let thread = checkpointer.load("t1").await.unwrap().unwrap();
        let contents: Vec<_> = thread.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "first", "two", "second"]);
    }

    #[tokio::test]
    async fn relay_renders_a_full_tool_turn() {
        let llm = MockLlmClient::from_steps(
            "mock-model",
            vec![
                MockStep::tool_call("call-1", "lookup", serde_json::json!({"query": "plans"})),
                MockStep::text("Done"),
            ],
        );
        let runner = runner_with(llm, AgentConfig::default());

        let mut sink = RecordingSink::default();
        let mut history = Vec::new();
        StreamingRelay::new(&mut sink, &mut history)
            .run(runner.stream_turn(TurnRequest::new("find plans", "t1")))
            .await
            .expect("relay should succeed");

        assert!(matches!(sink.events[0], UiEvent::ToolCalls(_)));
        assert!(matches!(sink.events[1], UiEvent::ToolResponse(_)));
        assert_eq!(sink.events[2], UiEvent::MessageToken("Done".into()));
        assert_eq!(sink.events[3], UiEvent::MessageComplete("Done".into()));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Done");
    }
}
