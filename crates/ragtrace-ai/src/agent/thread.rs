//! Conversation thread persistence seam.
//!
//! A thread owns one checkpointed transcript; turns on the same thread id
//! share it. Storage backends implement [`Checkpointer`]; the snapshot
//! payload is a compact postcard encoding with a forward-compatible
//! schema version.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AiError, Result};
use crate::llm::Message;

const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Loads and saves a thread's transcript by thread id.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<Message>>>;
    async fn save(&self, thread_id: &str, messages: &[Message]) -> Result<()>;
}

/// Snapshot payload persisted per thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// JSON-encoded transcript messages.
    pub messages: Vec<String>,
    /// Forward-compatible schema version.
    pub schema_version: u32,
}

impl ThreadSnapshot {
    /// Construct a snapshot with the current schema version.
    pub fn new(messages: &[Message]) -> Result<Self> {
        let encoded = messages
            .iter()
            .map(|message| {
                serde_json::to_string(message)
                    .map_err(|e| AiError::Agent(format!("Failed to encode message: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            messages: encoded,
            schema_version: CURRENT_SCHEMA_VERSION,
        })
    }

    /// Decode snapshot messages back to typed chat messages.
    pub fn decode_messages(&self) -> Result<Vec<Message>> {
        self.messages
            .iter()
            .map(|encoded| {
                serde_json::from_str::<Message>(encoded)
                    .map_err(|e| AiError::Agent(format!("Failed to decode message: {e}")))
            })
            .collect()
    }
}

/// Serialize a snapshot to compact postcard bytes.
pub fn snapshot_save(snapshot: &ThreadSnapshot) -> Result<Vec<u8>> {
    postcard::to_stdvec(snapshot)
        .map_err(|e| AiError::Agent(format!("Failed to serialize thread snapshot: {e}")))
}

/// Restore a snapshot from postcard bytes.
pub fn snapshot_restore(bytes: &[u8]) -> Result<ThreadSnapshot> {
    let snapshot: ThreadSnapshot = postcard::from_bytes(bytes)
        .map_err(|e| AiError::Agent(format!("Failed to deserialize thread snapshot: {e}")))?;

    if snapshot.schema_version == 0 || snapshot.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(AiError::Agent(format!(
            "Unsupported thread snapshot schema version: {}",
            snapshot.schema_version
        )));
    }

    Ok(snapshot)
}

/// In-memory checkpointer for tests and batch evaluation.
#[derive(Default)]
pub struct MemoryCheckpointer {
    threads: RwLock<HashMap<String, Vec<Message>>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<Message>>> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, messages: &[Message]) -> Result<()> {
        self.threads
            .write()
            .await
            .insert(thread_id.to_string(), messages.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_roundtrip_with_postcard() {
        let messages = vec![Message::system("be helpful"), Message::user("hello")];
        let snapshot = ThreadSnapshot::new(&messages).expect("build snapshot");

        let bytes = snapshot_save(&snapshot).expect("serialize snapshot");
        let restored = snapshot_restore(&bytes).expect("restore snapshot");

        assert_eq!(restored.schema_version, snapshot.schema_version);
        let decoded = restored.decode_messages().expect("decode messages");
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].content, "hello");
    }

    #[test]
    fn snapshot_restore_rejects_unknown_schema() {
        let mut snapshot = ThreadSnapshot::new(&[]).expect("build snapshot");
        snapshot.schema_version = CURRENT_SCHEMA_VERSION + 1;

        let bytes = postcard::to_stdvec(&snapshot).expect("serialize snapshot");
        let err = snapshot_restore(&bytes).expect_err("must reject future schema");
        assert!(format!("{err}").contains("Unsupported thread snapshot schema version"));
    }

    #[tokio::test]
    async fn memory_checkpointer_is_keyed_by_thread() {
        let checkpointer = MemoryCheckpointer::new();
        checkpointer
            .save("t1", &[Message::user("one")])
            .await
            .unwrap();

        assert!(checkpointer.load("t2").await.unwrap().is_none());
        let loaded = checkpointer.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded[0].content, "one");
    }
}
