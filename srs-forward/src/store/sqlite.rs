//! SQLite-backed task store.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use super::{FORWARD_TASK_KEY, TaskStore};
use crate::{Error, Result};

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 4;

/// Task store persisting records in the `kv_hash` table.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
    key: String,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            key: FORWARD_TASK_KEY.to_string(),
        }
    }

    /// Open (creating if needed) the database at `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        let mut connect_options = SqliteConnectOptions::from_str(database_url)?
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
            .create_if_missing(true);
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is a separate database.
        let max_connections = if in_memory { 1 } else { DEFAULT_POOL_SIZE };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await?;

        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(
            "Task store initialized, {} max connections",
            max_connections
        );

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn persistence_error(op: &str, task_id: &str, e: sqlx::Error) -> Error {
    Error::persistence(format!("{op} {FORWARD_TASK_KEY} {task_id}: {e}"))
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn put(&self, task_id: &str, record: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_hash (key, field, value, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(key, field) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.key)
        .bind(task_id)
        .bind(record)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_error("hset", task_id, e))?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM kv_hash WHERE key = ? AND field = ?")
                .bind(&self.key)
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| persistence_error("hget", task_id, e))?;
        Ok(row.map(|r| r.0))
    }

    async fn delete(&self, task_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_hash WHERE key = ? AND field = ?")
            .bind(&self.key)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_error("hdel", task_id, e))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT field, value FROM kv_hash WHERE key = ? ORDER BY field")
                .bind(&self.key)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| persistence_error("hgetall", "*", e))?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> SqliteTaskStore {
        SqliteTaskStore::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory store")
    }

    #[tokio::test]
    async fn put_get_roundtrip_and_upsert() {
        let store = setup_store().await;
        assert!(store.get("missing").await.unwrap().is_none());

        store.put("t1", r#"{"pid":1}"#).await.unwrap();
        store.put("t1", r#"{"pid":0}"#).await.unwrap();
        store.put("t2", r#"{"pid":7}"#).await.unwrap();

        assert_eq!(store.get("t1").await.unwrap().as_deref(), Some(r#"{"pid":0}"#));
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "t1");
    }

    #[tokio::test]
    async fn records_are_namespaced() {
        let store = setup_store().await;
        sqlx::query("INSERT INTO kv_hash (key, field, value, updated_at) VALUES ('OTHER', 't9', 'x', '')")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(store.get("t9").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_absent_is_ok() {
        let store = setup_store().await;
        store.delete("nope").await.unwrap();
        store.put("t1", "v").await.unwrap();
        store.delete("t1").await.unwrap();
        assert!(store.get("t1").await.unwrap().is_none());
    }
}
