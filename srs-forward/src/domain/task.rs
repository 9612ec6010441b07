//! Forwarding task record and its read-only snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DestinationConfig;

/// Lifecycle state of a process supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    #[default]
    Idle,
    Starting,
    Running,
    Exited,
    Cancelled,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the last forwarding attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskExit {
    /// The process exited by itself. `code` is `None` when it was killed by a signal.
    Exited { code: Option<i32> },
    /// The supervisor was cancelled and killed the process.
    Cancelled,
    /// Waiting on the process failed, its real exit status is unknown.
    WaitFailed { error: String },
    /// The process could not be started.
    SpawnFailed { error: String },
    /// A previous instance died while this task was running.
    Abandoned,
}

impl TaskExit {
    pub fn from_wait(status: std::io::Result<std::process::ExitStatus>) -> Self {
        match status {
            Ok(status) => Self::Exited {
                code: status.code(),
            },
            Err(e) => Self::WaitFailed {
                error: e.to_string(),
            },
        }
    }
}

/// Identity and runtime state of one forwarding task, as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: String,
    pub platform: String,
    /// Canonical stream url (`app/stream`) the task forwards.
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
    /// Forwarder pid, 0 while no process runs.
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub state: SupervisorState,
    #[serde(default)]
    pub last_frame: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_exit: Option<TaskExit>,
    pub config: DestinationConfig,
}

impl TaskRecord {
    /// Create a fresh record with a new task id.
    pub fn new(stream_url: impl Into<String>, config: DestinationConfig) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            platform: config.platform.clone(),
            stream: stream_url.into(),
            input: String::new(),
            output: String::new(),
            pid: 0,
            state: SupervisorState::Idle,
            last_frame: String::new(),
            updated_at: None,
            last_exit: None,
            config,
        }
    }

    pub fn update_frame(&mut self, frame: String) {
        self.last_frame = frame;
        self.updated_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            platform: self.platform.clone(),
            stream: self.stream.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            pid: self.pid,
            state: self.state,
            last_frame: self.last_frame.clone(),
            updated_at: self.updated_at,
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl std::fmt::Display for TaskRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "task={}, platform={}, input={}, output={}, pid={}, state={}, frame={}B",
            self.task_id,
            self.platform,
            self.input,
            self.output,
            self.pid,
            self.state,
            self.last_frame.len()
        )
    }
}

/// Point-in-time view of a task, returned by registry queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: String,
    pub platform: String,
    pub stream: String,
    pub input: String,
    pub output: String,
    pub pid: u32,
    pub state: SupervisorState,
    pub last_frame: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_idle() {
        let record = TaskRecord::new("live/s1", DestinationConfig::new("wx", "rtmp://localhost/live", "abc"));
        assert_eq!(record.platform, "wx");
        assert_eq!(record.pid, 0);
        assert_eq!(record.state, SupervisorState::Idle);
        assert!(record.updated_at.is_none());
        assert!(Uuid::parse_str(&record.task_id).is_ok());
    }

    #[test]
    fn task_ids_are_unique() {
        let config = DestinationConfig::new("wx", "rtmp://localhost/live", "abc");
        let a = TaskRecord::new("live/s1", config.clone());
        let b = TaskRecord::new("live/s1", config);
        assert_ne!(a.task_id, b.task_id);
    }

    #[test]
    fn persisted_shape_uses_camel_case() {
        let mut record = TaskRecord::new("live/s1", DestinationConfig::new("wx", "rtmp://localhost/live", "abc"));
        record.pid = 42;
        record.update_frame("frame=100".to_string());
        record.last_exit = Some(TaskExit::Exited { code: Some(1) });

        let value = serde_json::to_value(&record).unwrap();
        for key in ["taskId", "platform", "input", "output", "pid", "lastFrame", "updatedAt", "config"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["state"], "idle");
        assert_eq!(value["lastExit"]["kind"], "exited");
        assert_eq!(value["config"]["secret"], "abc");

        let back = TaskRecord::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn wait_failure_is_distinguishable() {
        let exit = TaskExit::from_wait(Err(std::io::Error::other("boom")));
        assert_eq!(
            exit,
            TaskExit::WaitFailed {
                error: "boom".to_string()
            }
        );
    }
}
