//! Vector index over knowledge-base documents.
//!
//! Embeddings are persisted to redb for durability; the HNSW index is
//! kept in memory and rebuilt from the database on open.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use hnsw_rs::prelude::*;
use parking_lot::RwLock;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

type CosineIndex = Hnsw<'static, f32, DistCosine>;

const EMBEDDING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kb_embeddings");

/// HNSW construction parameters.
#[derive(Debug, Clone)]
pub struct VectorConfig {
    pub dimension: usize,
    pub max_connections: usize,
    pub ef_construction: usize,
    pub max_elements: usize,
    /// Search width at query time.
    pub ef_search: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimension: 1536,
            max_connections: 16,
            ef_construction: 200,
            max_elements: 100_000,
            ef_search: 50,
        }
    }
}

/// Durable embedding store with an in-memory cosine index.
pub struct VectorStore {
    db: Arc<Database>,
    config: VectorConfig,
    index: RwLock<CosineIndex>,
    /// doc_id -> internal vector id
    id_map: RwLock<HashMap<String, usize>>,
    /// internal vector id -> doc_id
    reverse_map: RwLock<HashMap<usize, String>>,
    next_id: RwLock<usize>,
}

impl VectorStore {
    /// Open the store, rebuilding the index from persisted embeddings.
    pub fn open(db: Arc<Database>, config: VectorConfig) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(EMBEDDING_TABLE)?;
        write_txn.commit()?;

        let store = Self {
            index: RwLock::new(Self::empty_index(&config)),
            db,
            config,
            id_map: RwLock::new(HashMap::new()),
            reverse_map: RwLock::new(HashMap::new()),
            next_id: RwLock::new(0),
        };

        store.rebuild_index()?;
        Ok(store)
    }

    fn empty_index(config: &VectorConfig) -> CosineIndex {
        Hnsw::new(
            config.max_connections,
            config.max_elements,
            16,
            config.ef_construction,
            DistCosine,
        )
    }

    /// Insert or replace the embedding for a document.
    pub fn add(&self, doc_id: &str, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.config.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.config.dimension,
                embedding.len()
            );
        }

        if self.id_map.read().contains_key(doc_id) {
            self.remove(doc_id)?;
        }

        let vector_id = {
            let mut next = self.next_id.write();
            let id = *next;
            *next += 1;
            id
        };

        self.index.read().insert((embedding, vector_id));

        {
            let mut id_map = self.id_map.write();
            let mut reverse = self.reverse_map.write();
            id_map.insert(doc_id.to_string(), vector_id);
            reverse.insert(vector_id, doc_id.to_string());
        }

        self.persist(doc_id, embedding)?;
        Ok(())
    }

    /// Drop a document's embedding. Returns false if absent.
    pub fn remove(&self, doc_id: &str) -> Result<bool> {
        let vector_id = {
            let id_map = self.id_map.read();
            match id_map.get(doc_id) {
                Some(&id) => id,
                None => return Ok(false),
            }
        };

        {
            let mut id_map = self.id_map.write();
            let mut reverse = self.reverse_map.write();
            id_map.remove(doc_id);
            reverse.remove(&vector_id);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EMBEDDING_TABLE)?;
            table.remove(doc_id)?;
        }
        write_txn.commit()?;

        Ok(true)
    }

    /// Nearest documents to a query embedding, as (doc_id, distance).
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.config.dimension {
            anyhow::bail!(
                "Query dimension mismatch: expected {}, got {}",
                self.config.dimension,
                query.len()
            );
        }

        let index = self.index.read();
        let reverse = self.reverse_map.read();
        let results = index.search(query, top_k, self.config.ef_search);
        Ok(results
            .into_iter()
            .filter_map(|item| {
                let doc_id = reverse.get(&item.d_id)?;
                Some((doc_id.clone(), item.distance))
            })
            .collect())
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.id_map.read().contains_key(doc_id)
    }

    pub fn count(&self) -> usize {
        self.id_map.read().len()
    }

    fn persist(&self, doc_id: &str, embedding: &[f32]) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(embedding, bincode::config::standard())?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EMBEDDING_TABLE)?;
            table.insert(doc_id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn rebuild_index(&self) -> Result<()> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EMBEDDING_TABLE)?;
        let mut embeddings: Vec<(String, Vec<f32>)> = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            let doc_id = key.value().to_string();
            let (embedding, _): (Vec<f32>, usize) =
                bincode::serde::decode_from_slice(value.value(), bincode::config::standard())?;
            embeddings.push((doc_id, embedding));
        }
        drop(read_txn);

        let mut index = self.index.write();
        let mut id_map = self.id_map.write();
        let mut reverse = self.reverse_map.write();
        let mut next_id = self.next_id.write();

        *index = Self::empty_index(&self.config);
        id_map.clear();
        reverse.clear();
        *next_id = 0;

        for (doc_id, embedding) in embeddings {
            let vector_id = *next_id;
            *next_id += 1;
            index.insert((embedding.as_slice(), vector_id));
            id_map.insert(doc_id.clone(), vector_id);
            reverse.insert(vector_id, doc_id);
        }

        if !id_map.is_empty() {
            tracing::info!("Rebuilt vector index with {} embeddings", id_map.len());
        }
        Ok(())
    }
}
