//! Chat service: wires settings, LLM, MCP tools, threads, and tracing
//! into the agent runner, and drives the streaming relay per turn.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ragtrace_ai::agent::{
    AgentConfig, MessageSink, StreamingRelay, TurnRequest,
};
use ragtrace_ai::llm::{AnthropicClient, LlmClient, Message, OpenAIClient};
use ragtrace_ai::tools::ToolRegistry;
use ragtrace_ai::AgentRunner;
use redb::Database;

use crate::mcp::McpToolClient;
use crate::settings::{LlmProvider, Settings};
use crate::threads::RedbCheckpointer;
use crate::{paths, trace};

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant. You answer questions using a knowledge base.

When a user asks a question, you must search for the answer in the knowledge base.

DO NOT provide any answer that is not supported by information from the knowledge base.

If you cannot find any information on the topic in the knowledge base, tell the user and do not attempt to answer the question on your own.";

/// The assembled chat application.
pub struct ChatApp {
    runner: AgentRunner,
    trace_path: PathBuf,
    // Holds the MCP child process for the lifetime of the app.
    _mcp: Option<McpToolClient>,
}

/// Build the LLM client selected by settings.
pub fn build_llm_client(settings: &Settings) -> Arc<dyn LlmClient> {
    let api_key = settings.llm.api_key.clone().unwrap_or_default();
    match settings.llm.provider {
        LlmProvider::OpenAI => {
            let mut client = OpenAIClient::new(api_key).with_model(&settings.llm.model);
            if let Some(base_url) = &settings.llm.base_url {
                client = client.with_base_url(base_url);
            }
            Arc::new(client)
        }
        LlmProvider::Anthropic => {
            let mut client = AnthropicClient::new(api_key).with_model(&settings.llm.model);
            if let Some(base_url) = &settings.llm.base_url {
                client = client.with_base_url(base_url);
            }
            Arc::new(client)
        }
    }
}

impl ChatApp {
    /// Construct the full chat stack from settings.
    ///
    /// Spawns the knowledge-base MCP server as a child process and
    /// registers its tools with the agent runner.
    pub async fn build(settings: &Settings) -> Result<Self> {
        let data_dir = paths::data_dir(settings)?;
        let trace_path = paths::trace_path(settings, &data_dir);

        let llm = build_llm_client(settings);

        let mcp = McpToolClient::spawn_kb_server()
            .await
            .context("Failed to start knowledge base MCP server")?;
        let mut registry = ToolRegistry::new();
        let tool_count = mcp.register_into(&mut registry).await?;
        tracing::info!("Registered {tool_count} knowledge base tools");

        let thread_db = Arc::new(
            Database::create(paths::thread_database_path(&data_dir))
                .context("Failed to open thread database")?,
        );
        let checkpointer = Arc::new(RedbCheckpointer::new(thread_db)?);

        let runner = AgentRunner::new(
            llm,
            Arc::new(registry),
            checkpointer,
            AgentConfig {
                system_prompt: SYSTEM_PROMPT.to_string(),
                temperature: settings.llm.temperature,
                max_iterations: settings.llm.max_iterations,
                max_tokens: None,
            },
        );

        Ok(Self {
            runner,
            trace_path,
            _mcp: Some(mcp),
        })
    }

    pub fn runner(&self) -> &AgentRunner {
        &self.runner
    }

    /// Run one chat turn: stream events through the relay into the sink,
    /// appending finalized assistant messages to `history`.
    ///
    /// The turn trace is flushed when this returns, success or not.
    pub async fn respond(
        &self,
        thread_id: &str,
        user: Option<&str>,
        content: &str,
        sink: &mut dyn MessageSink,
        history: &mut Vec<Message>,
    ) -> Result<()> {
        let guard = trace::start_turn(thread_id, &self.trace_path);
        trace::record_event("turn_started", serde_json::json!({ "content": content }));
        if let Some(user) = user {
            trace::update_current_trace("user", serde_json::json!(user));
        }

        let mut request = TurnRequest::new(content, thread_id);
        if let Some(user) = user {
            request = request.with_user(user);
        }

        let events = self.runner.stream_turn(request);
        let result = StreamingRelay::new(sink, history).run(events).await;

        trace::record_event(
            "turn_finished",
            serde_json::json!({ "ok": result.is_ok() }),
        );
        guard.finish();

        result.context("Chat turn failed")
    }
}
