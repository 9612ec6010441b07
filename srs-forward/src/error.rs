//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The forwarding process could not be started.
    #[error("Failed to spawn forwarder for task {task_id} (platform {platform}): `{command}`: {source}")]
    Spawn {
        task_id: String,
        platform: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The forwarding process started but its stderr pipe was unavailable.
    #[error("Failed to capture stderr for task {task_id} (platform {platform})")]
    Pipe { task_id: String, platform: String },

    /// A signal could not be delivered to a process.
    #[error("Failed to terminate pid {pid}: {source}")]
    Termination {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Registry is shutting down, refusing to start {platform}")]
    ShuttingDown { platform: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }
}
