//! Knowledge base: redb-persisted documents with semantic search.
//!
//! Documents live in redb; their embeddings are indexed by [`VectorStore`].
//! Model-specific prefixes are applied to text before embedding (documents
//! and queries get different prefixes) but never stored.

pub mod ingest;
pub mod vector;

use std::sync::Arc;

use anyhow::{Context, Result};
use ragtrace_ai::embedding::EmbeddingProvider;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use vector::{VectorConfig, VectorStore};

const DOCUMENT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kb_documents");

const WIKI_PAGE_SOURCE: &str = "wiki_page";

/// One passage in the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// A search result with its cosine distance (lower is closer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    pub distance: f32,
}

/// Knowledge-base configuration derived from settings.
#[derive(Debug, Clone, Default)]
pub struct KbConfig {
    pub dimension: usize,
    pub document_prefix: String,
    pub search_prefix: String,
}

pub struct KnowledgeBase {
    db: Arc<Database>,
    vectors: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    document_prefix: String,
    search_prefix: String,
}

impl KnowledgeBase {
    /// Open the knowledge base, rebuilding the vector index from redb.
    pub fn open(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: KbConfig,
    ) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(DOCUMENT_TABLE)?;
        write_txn.commit()?;

        let vectors = VectorStore::open(
            db.clone(),
            VectorConfig {
                dimension: config.dimension,
                ..VectorConfig::default()
            },
        )?;

        Ok(Self {
            db,
            vectors,
            embedder,
            document_prefix: config.document_prefix,
            search_prefix: config.search_prefix,
        })
    }

    /// Embed and store a batch of documents.
    pub async fn add_documents(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = documents
            .iter()
            .map(|doc| format!("{}{}", self.document_prefix, doc.content))
            .collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed documents")?;

        for (doc, embedding) in documents.iter().zip(embeddings.iter()) {
            self.store_document(doc)?;
            self.vectors.add(&doc.id, embedding)?;
        }

        Ok(())
    }

    /// Semantic search: top-k documents closest to the query.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let prefixed = format!("{}{}", self.search_prefix, query);
        let embedding = self
            .embedder
            .embed(&prefixed)
            .await
            .context("Failed to embed query")?;

        let mut hits = Vec::new();
        for (doc_id, distance) in self.vectors.search(&embedding, k)? {
            let Some(doc) = self.get_document(&doc_id)? else {
                continue;
            };
            hits.push(SearchHit {
                id: doc.id,
                content: doc.content,
                metadata: doc.metadata,
                distance,
            });
        }
        Ok(hits)
    }

    /// Create (or replace) a wiki page, indexed under its title.
    pub async fn create_page(&self, title: &str, content: &str) -> Result<Document> {
        let title = title.trim();
        if title.is_empty() {
            anyhow::bail!("Page title must not be empty");
        }

        let doc = Document::new(format!("wiki:{title}"), content)
            .with_metadata("title", Value::String(title.to_string()))
            .with_metadata("source", Value::String(WIKI_PAGE_SOURCE.to_string()));
        self.add_documents(std::slice::from_ref(&doc)).await?;
        Ok(doc)
    }

    /// Titles of all wiki pages, sorted.
    pub fn list_pages(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DOCUMENT_TABLE)?;

        let mut titles = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let doc: Document = serde_json::from_slice(value.value())?;
            if doc.metadata.get("source").and_then(Value::as_str) == Some(WIKI_PAGE_SOURCE)
                && let Some(title) = doc.metadata.get("title").and_then(Value::as_str)
            {
                titles.push(title.to_string());
            }
        }
        titles.sort();
        Ok(titles)
    }

    /// Whether any documents are indexed.
    pub fn is_populated(&self) -> bool {
        self.vectors.count() > 0
    }

    pub fn document_count(&self) -> usize {
        self.vectors.count()
    }

    fn store_document(&self, doc: &Document) -> Result<()> {
        let bytes = serde_json::to_vec(doc)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DOCUMENT_TABLE)?;
            table.insert(doc.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_document(&self, doc_id: &str) -> Result<Option<Document>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DOCUMENT_TABLE)?;
        let Some(bytes) = table.get(doc_id)? else {
            return Ok(None);
        };
        let doc: Document = serde_json::from_slice(bytes.value())?;
        Ok(Some(doc))
    }
}
