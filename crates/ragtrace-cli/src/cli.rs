use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ragtrace")]
#[command(version, about = "ragtrace - retrieval-augmented chat agent with turn tracing")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat session
    Chat(ChatArgs),

    /// Run the knowledge base MCP server over stdio
    McpServer,

    /// Ingest a JSONL passage corpus into the knowledge base
    Ingest(IngestArgs),

    /// Evaluate the agent against a dataset
    Eval(EvalArgs),
}

#[derive(Args)]
pub struct ChatArgs {
    /// Conversation thread to resume (a new one is created by default)
    #[arg(long)]
    pub thread: Option<String>,

    /// User name attached to turn traces
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args)]
pub struct IngestArgs {
    /// Path to the JSONL corpus ({"id": ..., "passage": ...} per line)
    #[arg(long)]
    pub corpus: PathBuf,
}

#[derive(Args)]
pub struct EvalArgs {
    /// Path to the evaluation dataset (JSON)
    #[arg(long)]
    pub dataset: PathBuf,
}
