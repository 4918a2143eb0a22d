//! MCP surface: stdio server exposing the knowledge base, and a client
//! adapting remote MCP tools to the agent's tool registry.

pub mod client;
pub mod server;

pub use client::McpToolClient;
pub use server::KbMcpServer;
