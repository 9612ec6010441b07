//! Upstream event handling and crash recovery.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::registry::{StartOutcome, StartReport, TaskRegistry};
use crate::domain::{DestinationConfig, StreamIdentity, SupervisorState, TaskExit, TaskRecord, TaskSnapshot};
use crate::store::TaskStore;
use crate::Result;

/// Events delivered by the media server callback layer or an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ForwardEvent {
    OnPublish {
        #[serde(flatten)]
        stream: StreamIdentity,
        #[serde(default)]
        destinations: Vec<DestinationConfig>,
    },
    OnUnpublish {
        #[serde(flatten)]
        stream: StreamIdentity,
    },
    Query {
        platform: String,
    },
    Stop {
        platform: String,
    },
    List,
}

/// Reply to a [`ForwardEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ForwardReply {
    Started { outcomes: Vec<StartReport> },
    Stopped { count: usize },
    Task { task: TaskSnapshot },
    Tasks { tasks: Vec<TaskSnapshot> },
    Error { message: String },
}

/// Wires the registry to upstream events and recovers state left by a previous run.
pub struct ForwardService {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn TaskStore>,
}

impl ForwardService {
    pub fn new(registry: Arc<TaskRegistry>, store: Arc<dyn TaskStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub async fn on_stream_published(
        &self,
        stream: &StreamIdentity,
        destinations: &[DestinationConfig],
    ) -> Vec<StartOutcome> {
        info!("Stream published: {}", stream);
        let outcomes = self.registry.start(stream, destinations).await;
        let started = outcomes.iter().filter(|o| o.is_started()).count();
        debug!(
            "Stream {} forwarding to {} new destination(s)",
            stream.stream_url(),
            started
        );
        outcomes
    }

    /// Stop every task of `stream`, returning how many were stopped.
    pub async fn on_stream_unpublished(&self, stream: &StreamIdentity) -> Result<usize> {
        info!("Stream unpublished: {}", stream);
        self.registry.stop_stream(&stream.stream_url()).await
    }

    pub fn query_task(&self, platform: &str) -> Result<TaskSnapshot> {
        self.registry.query(platform)
    }

    pub async fn stop_task(&self, platform: &str) -> Result<()> {
        self.registry.stop(platform).await
    }

    pub async fn handle(&self, event: ForwardEvent) -> ForwardReply {
        let result = match event {
            ForwardEvent::OnPublish {
                stream,
                destinations,
            } => {
                let outcomes = self.on_stream_published(&stream, &destinations).await;
                Ok(ForwardReply::Started {
                    outcomes: outcomes.iter().map(StartOutcome::report).collect(),
                })
            }
            ForwardEvent::OnUnpublish { stream } => self
                .on_stream_unpublished(&stream)
                .await
                .map(|count| ForwardReply::Stopped { count }),
            ForwardEvent::Query { platform } => self
                .query_task(&platform)
                .map(|task| ForwardReply::Task { task }),
            ForwardEvent::Stop { platform } => {
                let was_running = self.registry.contains(&platform);
                self.stop_task(&platform).await.map(|()| ForwardReply::Stopped {
                    count: usize::from(was_running),
                })
            }
            ForwardEvent::List => Ok(ForwardReply::Tasks {
                tasks: self.registry.list(),
            }),
        };

        result.unwrap_or_else(|e| ForwardReply::Error {
            message: e.to_string(),
        })
    }

    /// Clear records a previous instance left with a live pid.
    ///
    /// The recorded process is killed when it still looks like our forwarder, and
    /// the record is re-persisted as idle. Returns the number of records recovered.
    pub async fn recover(&self) -> Result<usize> {
        let binary_name = std::path::Path::new(&self.registry.config().ffmpeg.binary_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut recovered = 0;
        for (task_id, json) in self.store.list().await? {
            let mut record = match TaskRecord::from_json(&json) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable task record {}: {}", task_id, e);
                    continue;
                }
            };
            if record.pid == 0 || self.registry.contains_task(&record.task_id) {
                continue;
            }

            match process_utils::inspect_process(record.pid) {
                Some(process) if !binary_name.is_empty() && process.name.contains(&binary_name) => {
                    match process_utils::kill_pid(record.pid) {
                        Ok(()) => info!(
                            "Killed leftover forwarder pid={} of task={}, platform={}",
                            record.pid, task_id, record.platform
                        ),
                        Err(e) => debug!("Failed to kill leftover pid {}: {}", record.pid, e),
                    }
                }
                Some(process) => debug!(
                    "Pid {} of task {} now belongs to {}, leaving it alone",
                    record.pid, task_id, process.name
                ),
                None => debug!("Leftover pid {} of task {} already gone", record.pid, task_id),
            }

            record.pid = 0;
            record.state = SupervisorState::Idle;
            record.last_exit = Some(TaskExit::Abandoned);
            match record.to_json() {
                Ok(json) => {
                    if let Err(e) = self.store.put(&task_id, &json).await {
                        warn!("Failed to save recovered task {}: {}", task_id, e);
                        continue;
                    }
                }
                Err(e) => {
                    warn!("Failed to serialize recovered task {}: {}", task_id, e);
                    continue;
                }
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!("Recovered {} abandoned forward task(s)", recovered);
        }
        Ok(recovered)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.registry.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwardConfig;
    use crate::store::MemoryTaskStore;

    fn service() -> (ForwardService, Arc<MemoryTaskStore>) {
        let store = Arc::new(MemoryTaskStore::new());
        let registry = Arc::new(TaskRegistry::new(
            Arc::new(ForwardConfig::default()),
            store.clone(),
        ));
        (ForwardService::new(registry, store.clone()), store)
    }

    #[test]
    fn parses_publish_event() {
        let json = r#"{"action":"on_publish","vhost":"__defaultVhost__","app":"live","stream":"s1","destinations":[{"platform":"wx","server":"rtmp://localhost/live","secret":"abc","enabled":true}]}"#;
        let event: ForwardEvent = serde_json::from_str(json).unwrap();
        match event {
            ForwardEvent::OnPublish {
                stream,
                destinations,
            } => {
                assert_eq!(stream.stream_url(), "live/s1");
                assert_eq!(destinations.len(), 1);
                assert_eq!(destinations[0].platform, "wx");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event: ForwardEvent = serde_json::from_str(r#"{"action":"list"}"#).unwrap();
        assert_eq!(event, ForwardEvent::List);
    }

    #[tokio::test]
    async fn query_unknown_replies_error() {
        let (service, _) = service();
        let reply = service
            .handle(ForwardEvent::Query {
                platform: "wx".to_string(),
            })
            .await;
        assert!(matches!(reply, ForwardReply::Error { .. }));

        let reply = service
            .handle(ForwardEvent::Stop {
                platform: "wx".to_string(),
            })
            .await;
        assert_eq!(reply, ForwardReply::Stopped { count: 0 });
    }

    #[tokio::test]
    async fn recover_clears_dead_pids() {
        let (service, store) = service();
        let mut record = TaskRecord::new(
            "live/s1",
            DestinationConfig::new("wx", "rtmp://localhost/live", "abc"),
        );
        // Far above any pid_max, so nothing can be running under it.
        record.pid = u32::MAX - 1;
        record.state = SupervisorState::Running;
        store.put(&record.task_id, &record.to_json().unwrap()).await.unwrap();

        let idle = TaskRecord::new(
            "live/s1",
            DestinationConfig::new("douyin", "rtmp://localhost/live", "xyz"),
        );
        store.put(&idle.task_id, &idle.to_json().unwrap()).await.unwrap();
        store.put("garbage", "not json").await.unwrap();

        assert_eq!(service.recover().await.unwrap(), 1);

        let stored = TaskRecord::from_json(&store.get(&record.task_id).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored.pid, 0);
        assert_eq!(stored.state, SupervisorState::Idle);
        assert_eq!(stored.last_exit, Some(TaskExit::Abandoned));

        assert_eq!(service.recover().await.unwrap(), 0);
    }
}
