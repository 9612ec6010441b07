//! Registry of active forwarding tasks, keyed by platform id.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::supervisor::ProcessSupervisor;
use crate::config::ForwardConfig;
use crate::domain::{DestinationConfig, StreamIdentity, TaskRecord, TaskSnapshot};
use crate::store::TaskStore;
use crate::{Error, Result};

/// Registry entry for one platform.
struct ActiveTask {
    task_id: String,
    stream: String,
    record: Arc<Mutex<TaskRecord>>,
    /// Cancels the supervisor.
    cancel: CancellationToken,
    /// Cancelled by the supervisor once cleanup has finished.
    done: CancellationToken,
}

/// Result of starting one destination.
#[derive(Debug)]
pub enum StartOutcome {
    Started {
        platform: String,
        task_id: String,
        pid: u32,
    },
    AlreadyRunning {
        platform: String,
        task_id: String,
    },
    Disabled {
        platform: String,
    },
    Failed {
        platform: String,
        error: Error,
    },
}

/// Serializable summary of a [`StartOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub platform: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartOutcome {
    pub fn platform(&self) -> &str {
        match self {
            Self::Started { platform, .. }
            | Self::AlreadyRunning { platform, .. }
            | Self::Disabled { platform }
            | Self::Failed { platform, .. } => platform,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }

    pub fn report(&self) -> StartReport {
        let mut report = StartReport {
            platform: self.platform().to_string(),
            status: "",
            task_id: None,
            pid: None,
            error: None,
        };
        match self {
            Self::Started { task_id, pid, .. } => {
                report.status = "started";
                report.task_id = Some(task_id.clone());
                report.pid = Some(*pid);
            }
            Self::AlreadyRunning { task_id, .. } => {
                report.status = "already_running";
                report.task_id = Some(task_id.clone());
            }
            Self::Disabled { .. } => report.status = "disabled",
            Self::Failed { error, .. } => {
                report.status = "failed";
                report.error = Some(error.to_string());
            }
        }
        report
    }
}

/// Removes the registry entry and signals completion when a supervisor ends,
/// including when its task panics.
struct Completion {
    tasks: Arc<DashMap<String, ActiveTask>>,
    platform: String,
    task_id: String,
    done: CancellationToken,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.tasks
            .remove_if(&self.platform, |_, t| t.task_id == self.task_id);
        self.done.cancel();
    }
}

/// The single authority on which platforms are being forwarded to.
///
/// Membership changes go through the map's entry API, so concurrent starts of the
/// same platform produce exactly one task. Supervisors run on their own tokio tasks
/// and never block each other.
pub struct TaskRegistry {
    config: Arc<ForwardConfig>,
    store: Arc<dyn TaskStore>,
    tasks: Arc<DashMap<String, ActiveTask>>,
    /// Parent of every task token.
    shutdown: CancellationToken,
}

impl TaskRegistry {
    pub fn new(config: Arc<ForwardConfig>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            config,
            store,
            tasks: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ForwardConfig {
        &self.config
    }

    /// Start forwarding `stream` to every enabled destination not yet registered.
    pub async fn start(
        &self,
        stream: &StreamIdentity,
        destinations: &[DestinationConfig],
    ) -> Vec<StartOutcome> {
        let mut outcomes = Vec::with_capacity(destinations.len());
        for destination in destinations {
            let outcome = self.start_one(stream, destination).await;
            if let StartOutcome::Failed { platform, error } = &outcome {
                warn!("Failed to start forward to {}: {}", platform, error);
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn start_one(
        &self,
        stream: &StreamIdentity,
        destination: &DestinationConfig,
    ) -> StartOutcome {
        let platform = destination.platform.clone();
        if !destination.enabled {
            debug!("Skipping disabled destination {}", destination);
            return StartOutcome::Disabled { platform };
        }
        if self.shutdown.is_cancelled() {
            return StartOutcome::Failed {
                error: Error::ShuttingDown {
                    platform: platform.clone(),
                },
                platform,
            };
        }

        let record = TaskRecord::new(stream.stream_url(), destination.clone());
        let task_id = record.task_id.clone();
        let supervisor = Arc::new(ProcessSupervisor::new(
            record,
            stream.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.store),
        ));
        let cancel = self.shutdown.child_token();
        let done = CancellationToken::new();

        match self.tasks.entry(platform.clone()) {
            Entry::Occupied(entry) => {
                debug!("Forward to {} already running", platform);
                return StartOutcome::AlreadyRunning {
                    task_id: entry.get().task_id.clone(),
                    platform,
                };
            }
            Entry::Vacant(entry) => {
                // Checked again under the shard lock so `shutdown` cannot miss it.
                if self.shutdown.is_cancelled() {
                    return StartOutcome::Failed {
                        error: Error::ShuttingDown {
                            platform: platform.clone(),
                        },
                        platform,
                    };
                }
                entry.insert(ActiveTask {
                    task_id: task_id.clone(),
                    stream: stream.stream_url(),
                    record: supervisor.record(),
                    cancel: cancel.clone(),
                    done: done.clone(),
                });
            }
        }

        info!(
            "Forward initialize task={}, platform={}, stream={}",
            task_id,
            platform,
            stream.stream_url()
        );

        let completion = Completion {
            tasks: Arc::clone(&self.tasks),
            platform: platform.clone(),
            task_id: task_id.clone(),
            done,
        };

        let process = match supervisor.spawn().await {
            Ok(process) => process,
            Err(error) => {
                drop(completion);
                return StartOutcome::Failed { platform, error };
            }
        };
        let pid = process.pid();

        tokio::spawn(async move {
            let _completion = completion;
            supervisor.run(process, cancel).await;
        });

        StartOutcome::Started {
            platform,
            task_id,
            pid,
        }
    }

    /// Stop forwarding to `platform` and wait until its supervisor has cleaned up.
    ///
    /// Stopping an unregistered platform succeeds without side effects.
    pub async fn stop(&self, platform: &str) -> Result<()> {
        let entry = self
            .tasks
            .get(platform)
            .map(|t| (t.task_id.clone(), t.cancel.clone(), t.done.clone()));
        let Some((task_id, cancel, done)) = entry else {
            debug!("No forward running for {}", platform);
            return Ok(());
        };

        info!("Stopping forward task={}, platform={}", task_id, platform);
        cancel.cancel();
        done.cancelled().await;
        self.tasks.remove_if(platform, |_, t| t.task_id == task_id);
        Ok(())
    }

    /// Stop every registered task and wait for all of them.
    pub async fn stop_all(&self) -> Result<()> {
        let platforms: Vec<String> = self.tasks.iter().map(|t| t.key().clone()).collect();
        self.stop_many(platforms).await
    }

    /// Stop the tasks forwarding `stream_url` and wait for them.
    pub async fn stop_stream(&self, stream_url: &str) -> Result<usize> {
        let platforms: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| t.stream == stream_url)
            .map(|t| t.key().clone())
            .collect();
        let count = platforms.len();
        self.stop_many(platforms).await?;
        Ok(count)
    }

    async fn stop_many(&self, platforms: Vec<String>) -> Result<()> {
        let results = join_all(platforms.iter().map(|p| self.stop(p))).await;
        results.into_iter().collect()
    }

    /// Reject new starts, then stop every task.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down {} forward task(s)", self.tasks.len());
        self.shutdown.cancel();
        // A start racing the cancel may have registered after the first pass.
        while !self.tasks.is_empty() {
            self.stop_all().await?;
        }
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Snapshot of the task for `platform`.
    pub fn query(&self, platform: &str) -> Result<TaskSnapshot> {
        self.tasks
            .get(platform)
            .map(|t| t.record.lock().snapshot())
            .ok_or_else(|| Error::not_found("ForwardTask", platform))
    }

    /// Snapshots of all tasks, ordered by platform.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = self
            .tasks
            .iter()
            .map(|t| t.record.lock().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.platform.cmp(&b.platform));
        snapshots
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.tasks.contains_key(platform)
    }

    pub fn contains_task(&self, task_id: &str) -> bool {
        self.tasks.iter().any(|t| t.task_id == task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_VHOST;
    use crate::store::MemoryTaskStore;

    fn registry(binary: &str) -> TaskRegistry {
        let mut config = ForwardConfig::default();
        config.ffmpeg.binary_path = binary.to_string();
        TaskRegistry::new(Arc::new(config), Arc::new(MemoryTaskStore::new()))
    }

    #[tokio::test]
    async fn stop_unknown_platform_is_ok() {
        let registry = registry("ffmpeg");
        registry.stop("nope").await.unwrap();
        registry.stop_all().await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn query_unknown_platform_is_not_found() {
        let registry = registry("ffmpeg");
        assert!(matches!(
            registry.query("wx"),
            Err(Error::NotFound { ref id, .. }) if id == "wx"
        ));
    }

    #[tokio::test]
    async fn disabled_destinations_are_skipped() {
        let registry = registry("ffmpeg");
        let mut destination = DestinationConfig::new("wx", "rtmp://localhost/live", "abc");
        destination.enabled = false;

        let outcomes = registry
            .start(&StreamIdentity::new(DEFAULT_VHOST, "live", "s1"), &[destination])
            .await;
        assert!(matches!(outcomes[0], StartOutcome::Disabled { .. }));
        assert_eq!(outcomes[0].report().status, "disabled");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_leaves_platform_unregistered() {
        let registry = registry("/nonexistent/forwarder-binary");
        let outcomes = registry
            .start(
                &StreamIdentity::new(DEFAULT_VHOST, "live", "s1"),
                &[DestinationConfig::new("wx", "rtmp://localhost/live", "abc")],
            )
            .await;

        match &outcomes[0] {
            StartOutcome::Failed { platform, error } => {
                assert_eq!(platform, "wx");
                assert!(matches!(error, Error::Spawn { .. }));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let report = outcomes[0].report();
        assert_eq!(report.status, "failed");
        assert!(report.error.is_some());
        assert!(!registry.contains("wx"));
        assert!(registry.query("wx").is_err());
    }

    #[tokio::test]
    async fn start_after_shutdown_is_rejected() {
        let registry = registry("ffmpeg");
        registry.shutdown().await.unwrap();
        assert!(registry.is_shutting_down());

        let outcomes = registry
            .start(
                &StreamIdentity::new(DEFAULT_VHOST, "live", "s1"),
                &[DestinationConfig::new("wx", "rtmp://localhost/live", "abc")],
            )
            .await;
        assert!(matches!(
            outcomes[0],
            StartOutcome::Failed {
                error: Error::ShuttingDown { .. },
                ..
            }
        ));
    }
}
