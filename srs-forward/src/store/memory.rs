//! In-memory task store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::TaskStore;
use crate::Result;

/// Non-durable store, used for tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: DashMap<String, String>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, task_id: &str, record: &str) -> Result<()> {
        self.records.insert(task_id.to_string(), record.to_string());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<String>> {
        Ok(self.records.get(task_id).map(|r| r.value().clone()))
    }

    async fn delete(&self, task_id: &str) -> Result<()> {
        self.records.remove(task_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_overwrites_and_delete_is_idempotent() {
        let store = MemoryTaskStore::new();
        store.put("t1", "a").await.unwrap();
        store.put("t1", "b").await.unwrap();
        assert_eq!(store.get("t1").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.len(), 1);

        store.delete("t1").await.unwrap();
        store.delete("t1").await.unwrap();
        assert!(store.get("t1").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
