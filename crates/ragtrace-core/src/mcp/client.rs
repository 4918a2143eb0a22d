//! MCP client: adapts remote MCP tools to the agent's tool registry.
//!
//! Spawns the knowledge-base server as a child process (`ragtrace
//! mcp-server`) speaking MCP over stdio, lists its tools, and wraps each
//! one so the agent runner calls it like any local tool.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ragtrace_ai::error::AiError;
use ragtrace_ai::tools::{Tool, ToolOutput, ToolRegistry};
use rmcp::model::CallToolRequestParams;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::ServiceExt;
use serde_json::Value;
use tokio::process::Command;

type McpService = RunningService<RoleClient, ()>;

/// Connection to a stdio MCP server.
pub struct McpToolClient {
    service: Arc<McpService>,
}

impl McpToolClient {
    /// Spawn `command args...` as an MCP server and initialize the session.
    pub async fn spawn(command: &str, args: &[&str]) -> Result<Self> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let transport = TokioChildProcess::new(Command::new(command).configure(|cmd| {
            cmd.args(&args);
        }))
        .with_context(|| format!("Failed to spawn MCP server '{command}'"))?;

        let service = ()
            .serve(transport)
            .await
            .context("MCP handshake failed")?;

        tracing::info!("Connected to MCP server '{command}'");
        Ok(Self {
            service: Arc::new(service),
        })
    }

    /// Spawn the bundled knowledge-base server via the current executable.
    pub async fn spawn_kb_server() -> Result<Self> {
        let exe = std::env::current_exe().context("Could not resolve current executable")?;
        let exe = exe.to_string_lossy().into_owned();
        Self::spawn(&exe, &["mcp-server"]).await
    }

    /// List remote tools and adapt each one to the [`Tool`] trait.
    pub async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let remote = self
            .service
            .list_all_tools()
            .await
            .context("Failed to list MCP tools")?;

        Ok(remote
            .into_iter()
            .map(|tool| {
                Arc::new(RemoteTool {
                    service: self.service.clone(),
                    name: tool.name.to_string(),
                    description: tool
                        .description
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                    parameters: Value::Object((*tool.input_schema).clone()),
                }) as Arc<dyn Tool>
            })
            .collect())
    }

    /// Register every remote tool into a registry.
    pub async fn register_into(&self, registry: &mut ToolRegistry) -> Result<usize> {
        let tools = self.tools().await?;
        let count = tools.len();
        for tool in tools {
            registry.register_arc(tool);
        }
        Ok(count)
    }
}

/// A remote MCP tool exposed through the local [`Tool`] trait.
struct RemoteTool {
    service: Arc<McpService>,
    name: String,
    description: String,
    parameters: Value,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, input: Value) -> ragtrace_ai::error::Result<ToolOutput> {
        let arguments = match input {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Ok(ToolOutput::error(format!(
                    "Tool arguments must be an object, got: {other}"
                )));
            }
        };

        // Build the request from its wire shape; only name and arguments
        // are meaningful for this server.
        let params: CallToolRequestParams = serde_json::from_value(serde_json::json!({
            "name": self.name,
            "arguments": arguments,
        }))
        .map_err(|e| AiError::Tool(format!("Invalid tool call parameters: {e}")))?;

        let result = self
            .service
            .call_tool(params)
            .await
            .map_err(|e| AiError::Tool(format!("MCP call to '{}' failed: {e}", self.name)))?;

        let text = result
            .content
            .iter()
            .filter_map(|content| content.as_text().map(|t| t.text.as_str()))
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error == Some(true) {
            return Ok(ToolOutput::error(if text.is_empty() {
                format!("Tool '{}' failed", self.name)
            } else {
                text
            }));
        }

        // Tool replies are JSON when the server produced structured output.
        let value = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(ToolOutput::success(value))
    }
}
