//! Persistence of forwarding task records.
//!
//! Records are kept in a hash keyed by task id under the [`FORWARD_TASK_KEY`]
//! collection, so that task state outlives the process and can be inspected or
//! recovered on the next start.

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use async_trait::async_trait;

use crate::Result;

/// Collection key all forwarding task records live under.
pub const FORWARD_TASK_KEY: &str = "SRS_FORWARD_TASK";

/// Hash-map store of serialized task records keyed by task id.
///
/// Implementations must tolerate concurrent writes for different task ids.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace the record for `task_id`.
    async fn put(&self, task_id: &str, record: &str) -> Result<()>;

    /// Get the record for `task_id`, `None` when absent.
    async fn get(&self, task_id: &str) -> Result<Option<String>>;

    /// Remove the record for `task_id`. Removing an absent record is not an error.
    async fn delete(&self, task_id: &str) -> Result<()>;

    /// All `(task_id, record)` pairs.
    async fn list(&self) -> Result<Vec<(String, String)>>;
}
