//! Corpus ingestion.
//!
//! Loads a JSONL passage corpus (one `{"id": ..., "passage": ...}` object
//! per line) into the knowledge base. Ingestion is idempotent at the store
//! level: a populated store is left untouched.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use super::{Document, KnowledgeBase};

/// Documents embedded per batch.
const INGEST_BATCH_SIZE: usize = 64;

#[derive(Debug, Deserialize)]
struct CorpusRow {
    id: Value,
    passage: String,
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Store already populated; nothing ingested.
    Skipped,
    /// Number of documents ingested.
    Ingested(usize),
}

/// Ingest a JSONL corpus file into the knowledge base.
pub async fn ingest_corpus(kb: &KnowledgeBase, path: &Path) -> Result<IngestOutcome> {
    if kb.is_populated() {
        tracing::info!(
            "Knowledge base already holds {} documents, skipping ingestion",
            kb.document_count()
        );
        return Ok(IngestOutcome::Skipped);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus {}", path.display()))?;

    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut documents = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: CorpusRow = serde_json::from_str(line)
            .with_context(|| format!("Invalid corpus line {}", line_no + 1))?;

        // Corpus ids may be numbers or strings.
        let id = match &row.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        documents.push(
            Document::new(id.clone(), row.passage)
                .with_metadata("row_id", Value::String(id))
                .with_metadata("dataset", Value::String(source.clone())),
        );
    }

    let total = documents.len();
    tracing::info!("Ingesting {} passages from {}", total, path.display());

    for batch in documents.chunks(INGEST_BATCH_SIZE) {
        kb.add_documents(batch).await?;
    }

    Ok(IngestOutcome::Ingested(total))
}
