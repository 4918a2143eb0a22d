//! ragtrace-core - Application services for the ragtrace demo
//!
//! Wires the agent framework (`ragtrace-ai`) into a runnable application:
//! settings, knowledge base with ingestion, MCP server/client, per-turn
//! tracing, durable conversation threads, and the chat service.

pub mod chat;
pub mod kb;
pub mod mcp;
pub mod paths;
pub mod settings;
pub mod threads;
pub mod trace;

pub use chat::{ChatApp, build_llm_client};
pub use kb::ingest::{IngestOutcome, ingest_corpus};
pub use kb::{Document, KbConfig, KnowledgeBase, SearchHit};
pub use mcp::{KbMcpServer, McpToolClient};
pub use settings::{LlmProvider, Settings};
pub use threads::RedbCheckpointer;
pub use trace::{TurnGuard, TurnTrace, start_turn, update_current_trace};
