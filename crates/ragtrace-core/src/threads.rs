//! Durable conversation threads backed by redb.

use std::sync::Arc;

use async_trait::async_trait;
use ragtrace_ai::agent::{Checkpointer, ThreadSnapshot, snapshot_restore, snapshot_save};
use ragtrace_ai::error::{AiError, Result};
use ragtrace_ai::llm::Message;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

const THREAD_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("threads");

/// Checkpointer persisting postcard-encoded thread snapshots to redb.
pub struct RedbCheckpointer {
    db: Arc<Database>,
}

impl RedbCheckpointer {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write().map_err(storage_err)?;
        write_txn.open_table(THREAD_TABLE).map_err(storage_err)?;
        write_txn.commit().map_err(storage_err)?;
        Ok(Self { db })
    }
}

fn storage_err(e: impl std::fmt::Display) -> AiError {
    AiError::Agent(format!("Thread storage error: {e}"))
}

#[async_trait]
impl Checkpointer for RedbCheckpointer {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<Message>>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(THREAD_TABLE).map_err(storage_err)?;
        let Some(bytes) = table.get(thread_id).map_err(storage_err)? else {
            return Ok(None);
        };

        let snapshot = snapshot_restore(bytes.value())?;
        Ok(Some(snapshot.decode_messages()?))
    }

    async fn save(&self, thread_id: &str, messages: &[Message]) -> Result<()> {
        let snapshot = ThreadSnapshot::new(messages)?;
        let bytes = snapshot_save(&snapshot)?;

        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(THREAD_TABLE).map_err(storage_err)?;
            table
                .insert(thread_id, bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_checkpointer() -> (RedbCheckpointer, tempfile::TempDir) {
        let temp = tempdir().unwrap();
        let db = Arc::new(Database::create(temp.path().join("test.redb")).unwrap());
        (RedbCheckpointer::new(db).unwrap(), temp)
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let (checkpointer, _temp) = create_checkpointer();
        let messages = vec![Message::system("be helpful"), Message::user("hello")];

        checkpointer.save("thread-1", &messages).await.unwrap();
        let loaded = checkpointer.load("thread-1").await.unwrap().unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].content, "hello");
    }

    #[tokio::test]
    async fn missing_thread_loads_as_none() {
        let (checkpointer, _temp) = create_checkpointer();
        assert!(checkpointer.load("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_previous_snapshot() {
        let (checkpointer, _temp) = create_checkpointer();
        checkpointer
            .save("thread-1", &[Message::user("one")])
            .await
            .unwrap();
        checkpointer
            .save("thread-1", &[Message::user("one"), Message::assistant("two")])
            .await
            .unwrap();

        let loaded = checkpointer.load("thread-1").await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
