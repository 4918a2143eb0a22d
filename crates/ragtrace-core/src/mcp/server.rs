//! MCP server exposing the knowledge base over stdio.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::tool::schema_for_type,
    model::{
        CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
        PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
    },
    schemars::{self, JsonSchema},
    service::{RequestContext, RoleServer},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{stdin, stdout};

use crate::kb::KnowledgeBase;

/// Knowledge-base MCP server.
#[derive(Clone)]
pub struct KbMcpServer {
    kb: Arc<KnowledgeBase>,
}

/// Parameters for the search tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// A natural language query to search the knowledge base
    pub query: String,
    /// Number of search results to return
    #[serde(default = "default_search_k")]
    pub k: usize,
}

fn default_search_k() -> usize {
    3
}

/// Parameters for the create_new_wiki_page tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CreatePageParams {
    /// Title of the new wiki page
    pub title: String,
    /// Full text content of the page
    pub content: String,
}

/// Empty parameters (for tools with no parameters)
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EmptyParams {}

impl KbMcpServer {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }

    /// Run the MCP server using stdio transport.
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Starting knowledge base MCP server...");
        let server = self.serve(stdio()).await?;
        tracing::info!("MCP server initialized, waiting for requests...");
        server.waiting().await?;
        Ok(())
    }

    /// Search never surfaces a protocol error: failures are reported in the
    /// result envelope so the agent can read and react to them.
    async fn handle_search(&self, params: SearchParams) -> String {
        tracing::info!("Search requested. query={:?}", params.query);
        let envelope = match self.kb.search(&params.query, params.k).await {
            Ok(hits) => {
                tracing::info!("Found {} results", hits.len());
                serde_json::json!({
                    "result": "success",
                    "documents": hits,
                })
            }
            Err(e) => {
                tracing::error!("Search failed: {e:#}");
                serde_json::json!({
                    "result": "error",
                    "message": format!("Search failed with error: {e}"),
                })
            }
        };

        serde_json::to_string_pretty(&envelope)
            .unwrap_or_else(|e| format!("{{\"result\": \"error\", \"message\": \"{e}\"}}"))
    }

    async fn handle_create_page(&self, params: CreatePageParams) -> Result<String, String> {
        let doc = self
            .kb
            .create_page(&params.title, &params.content)
            .await
            .map_err(|e| format!("Failed to create page: {e}"))?;

        Ok(format!("Created wiki page '{}' ({})", params.title, doc.id))
    }

    fn handle_list_pages(&self) -> Result<String, String> {
        let titles = self
            .kb
            .list_pages()
            .map_err(|e| format!("Failed to list pages: {e}"))?;

        serde_json::to_string_pretty(&titles).map_err(|e| e.to_string())
    }
}

/// Create stdio transport for MCP communication
fn stdio() -> (tokio::io::Stdin, tokio::io::Stdout) {
    (stdin(), stdout())
}

impl ServerHandler for KbMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ragtrace".to_string(),
                title: Some("Knowledge Base".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Knowledge base over a wiki passage corpus. Use search for semantic \
                retrieval, create_new_wiki_page to add a page, and list_wiki_pages \
                to enumerate page titles."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = vec![
            Tool::new(
                "search",
                "Search the knowledge base using semantic search. Returns the top matching documents.",
                schema_for_type::<SearchParams>(),
            ),
            Tool::new(
                "create_new_wiki_page",
                "Create a new wiki page in the knowledge base with a title and content. Replaces an existing page with the same title.",
                schema_for_type::<CreatePageParams>(),
            ),
            Tool::new(
                "list_wiki_pages",
                "List the titles of all wiki pages in the knowledge base.",
                schema_for_type::<EmptyParams>(),
            ),
        ];

        Ok(ListToolsResult {
            meta: None,
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let result = match request.name.as_ref() {
            "search" => {
                let params: SearchParams =
                    serde_json::from_value(Value::Object(request.arguments.unwrap_or_default()))
                        .map_err(|e| {
                            McpError::invalid_params(format!("Invalid parameters: {}", e), None)
                        })?;
                Ok(self.handle_search(params).await)
            }
            "create_new_wiki_page" => {
                let params: CreatePageParams =
                    serde_json::from_value(Value::Object(request.arguments.unwrap_or_default()))
                        .map_err(|e| {
                            McpError::invalid_params(format!("Invalid parameters: {}", e), None)
                        })?;
                self.handle_create_page(params).await
            }
            "list_wiki_pages" => self.handle_list_pages(),
            other => Err(format!("Unknown tool: {}", other)),
        };

        match result {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(error) => Ok(CallToolResult::error(vec![Content::text(error)])),
        }
    }
}
