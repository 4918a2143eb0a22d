use std::sync::Arc;

use anyhow::Result;
use ragtrace_core::{KbMcpServer, Settings};

pub async fn run(settings: &Settings) -> Result<()> {
    let kb = super::open_knowledge_base(settings)?;
    KbMcpServer::new(Arc::new(kb)).run().await
}
