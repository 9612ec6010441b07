//! Supervision of a single forwarding process.
//!
//! A [`ProcessSupervisor`] owns one [`TaskRecord`] and drives it through
//! `Idle -> Starting -> Running -> (Exited | Cancelled) -> Idle`:
//!
//! - [`ProcessSupervisor::spawn`] resolves the URLs, persists the record and starts
//!   the forwarder.
//! - [`ProcessSupervisor::run`] follows stderr until it closes, waits for the process
//!   (or kills it when the token is cancelled) and cleans up.
//!
//! The record is only written by its supervisor. Stderr chunks update it in memory;
//! the store is written at lifecycle transitions and on a periodic checkpoint.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ffmpeg::{self, READ_CHUNK_SIZE};
use crate::config::ForwardConfig;
use crate::domain::{StreamIdentity, SupervisorState, TaskExit, TaskRecord, TaskSnapshot};
use crate::store::TaskStore;
use crate::{Error, Result};

/// Lower bound for the checkpoint period.
const MIN_CHECKPOINT_INTERVAL: Duration = Duration::from_millis(1);

/// A started forwarder, handed from [`ProcessSupervisor::spawn`] to [`ProcessSupervisor::run`].
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    stderr: ChildStderr,
    pid: u32,
}

impl RunningProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Owns the forwarding process of one task.
pub struct ProcessSupervisor {
    task_id: String,
    platform: String,
    stream: StreamIdentity,
    record: Arc<Mutex<TaskRecord>>,
    config: Arc<ForwardConfig>,
    store: Arc<dyn TaskStore>,
}

impl ProcessSupervisor {
    pub fn new(
        record: TaskRecord,
        stream: StreamIdentity,
        config: Arc<ForwardConfig>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            task_id: record.task_id.clone(),
            platform: record.platform.clone(),
            stream,
            record: Arc::new(Mutex::new(record)),
            config,
            store,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Shared handle to the record, for read-only snapshots.
    pub fn record(&self) -> Arc<Mutex<TaskRecord>> {
        Arc::clone(&self.record)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.record.lock().snapshot()
    }

    /// Start the forwarder.
    ///
    /// The record is persisted before spawning so a durable entry exists even when
    /// the spawn fails. On failure the supervisor is back in `Idle`.
    pub async fn spawn(&self) -> Result<RunningProcess> {
        let input = self.stream.input_url(&self.config.runtime_host);
        let output = {
            let mut record = self.record.lock();
            let output = record.config.output_url(&self.config.runtime_host);
            record.input = input.clone();
            record.output = output.clone();
            record.pid = 0;
            record.state = SupervisorState::Starting;
            record.last_exit = None;
            output
        };
        self.save("initialize").await;

        let binary = &self.config.ffmpeg.binary_path;
        let args = ffmpeg::build_args(&self.config.ffmpeg, &input, &output);
        let command = ffmpeg::command_line(binary, &args);

        let spawned = process_utils::tokio_command(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                self.abort_start(TaskExit::SpawnFailed {
                    error: source.to_string(),
                })
                .await;
                return Err(Error::Spawn {
                    task_id: self.task_id.clone(),
                    platform: self.platform.clone(),
                    command,
                    source,
                });
            }
        };

        let Some(stderr) = child.stderr.take() else {
            let _ = child.start_kill();
            let _ = child.wait().await;
            self.abort_start(TaskExit::SpawnFailed {
                error: "stderr not captured".to_string(),
            })
            .await;
            return Err(Error::Pipe {
                task_id: self.task_id.clone(),
                platform: self.platform.clone(),
            });
        };

        let pid = child.id().unwrap_or(0);
        {
            let mut record = self.record.lock();
            record.pid = pid;
            record.state = SupervisorState::Running;
        }

        info!(
            task_id = %self.task_id,
            platform = %self.platform,
            stream = %self.stream.stream_url(),
            pid,
            "Forward started"
        );
        debug!("Forward command for {}: {}", self.task_id, command);
        self.save("start").await;

        Ok(RunningProcess { child, stderr, pid })
    }

    /// Follow the process until it exits or `cancel` fires, then clean up.
    ///
    /// Cleanup only begins after stderr has closed, so the process is no longer
    /// writing when this returns.
    pub async fn run(&self, process: RunningProcess, cancel: CancellationToken) -> TaskExit {
        let RunningProcess {
            mut child,
            stderr,
            pid,
        } = process;

        let waiter = async {
            tokio::select! {
                status = child.wait() => TaskExit::from_wait(status),
                _ = cancel.cancelled() => {
                    debug!("Forward {} cancelled, killing pid {}", self.task_id, pid);
                    if let Err(e) = child.start_kill() {
                        debug!("Kill of pid {} failed: {}", pid, e);
                    }
                    if let Err(e) = child.wait().await {
                        warn!("Error waiting for cancelled pid {}: {}", pid, e);
                    }
                    TaskExit::Cancelled
                }
            }
        };

        let ((), exit) = tokio::join!(self.monitor(stderr), waiter);

        {
            let mut record = self.record.lock();
            record.state = match exit {
                TaskExit::Cancelled => SupervisorState::Cancelled,
                _ => SupervisorState::Exited,
            };
        }
        match &exit {
            TaskExit::Exited { code: Some(0) } | TaskExit::Cancelled => {}
            TaskExit::WaitFailed { error } => {
                warn!("Error waiting for forwarder of {}: {}", self.task_id, error)
            }
            other => warn!("Forwarder of {} ended: {:?}", self.task_id, other),
        }

        self.cleanup(&exit, &cancel).await;

        info!(
            task_id = %self.task_id,
            platform = %self.platform,
            stream = %self.stream.stream_url(),
            pid,
            exit = ?exit,
            "Forward done"
        );
        exit
    }

    /// Read stderr in fixed-size chunks until it closes, keeping the last
    /// progress line in memory.
    async fn monitor(&self, mut stderr: ChildStderr) {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        // `interval` panics on a zero period.
        let period = self.config.checkpoint_interval.max(MIN_CHECKPOINT_INTERVAL);
        let mut checkpoint = tokio::time::interval(period);
        checkpoint.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        checkpoint.tick().await;
        let mut dirty = false;

        loop {
            tokio::select! {
                read = stderr.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("Forwarder stderr closed for {}", self.task_id);
                        break;
                    }
                    Ok(n) => {
                        let line = ffmpeg::normalize_progress(&String::from_utf8_lossy(&buf[..n]));
                        self.record.lock().update_frame(line);
                        dirty = true;
                    }
                    Err(e) => {
                        debug!("Error reading forwarder stderr for {}: {}", self.task_id, e);
                        break;
                    }
                },
                _ = checkpoint.tick() => {
                    if dirty {
                        dirty = false;
                        self.save("checkpoint").await;
                    }
                }
            }
        }
    }

    /// Kill any leftover process, pause before a possible restart, clear the pid
    /// and persist.
    async fn cleanup(&self, exit: &TaskExit, cancel: &CancellationToken) {
        let pid = self.record.lock().pid;

        if pid > 0 {
            // Only signal the pid while it still belongs to us; after the wait it
            // has been reaped and may have been reused. In practice the forced
            // termination is the `start_kill` in `run` on cancellation, this one
            // only fires when waiting on the child failed.
            if process_utils::is_own_child(pid) {
                if let Err(source) = process_utils::kill_pid(pid) {
                    let e = Error::Termination { pid, source };
                    debug!("Tolerating termination failure for {}: {}", self.task_id, e);
                }
            } else {
                debug!("Pid {} of {} already gone", pid, self.task_id);
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.restart_delay) => {}
            }
        }

        {
            let mut record = self.record.lock();
            record.pid = 0;
            record.state = SupervisorState::Idle;
            record.last_exit = Some(exit.clone());
        }
        // Not tied to `cancel`, this write completes during shutdown too.
        self.save("cleanup").await;
    }

    async fn abort_start(&self, exit: TaskExit) {
        {
            let mut record = self.record.lock();
            record.pid = 0;
            record.state = SupervisorState::Idle;
            record.last_exit = Some(exit);
        }
        self.save("spawn failure").await;
    }

    /// Write the record to the store.
    pub async fn persist(&self) -> Result<()> {
        let json = self.record.lock().to_json()?;
        self.store.put(&self.task_id, &json).await
    }

    /// Persist, logging instead of failing: the in-memory record stays authoritative.
    async fn save(&self, phase: &str) {
        if let Err(e) = self.persist().await {
            warn!(
                task_id = %self.task_id,
                platform = %self.platform,
                "Failed to save task on {}: {}",
                phase,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DEFAULT_VHOST, DestinationConfig};
    use crate::store::MemoryTaskStore;

    fn supervisor(binary: &str, store: Arc<MemoryTaskStore>) -> ProcessSupervisor {
        let mut config = ForwardConfig::default();
        config.ffmpeg.binary_path = binary.to_string();
        let stream = StreamIdentity::new(DEFAULT_VHOST, "live", "s1");
        let record = TaskRecord::new(
            stream.stream_url(),
            DestinationConfig::new("wx", "rtmp://localhost/live", "abc"),
        );
        ProcessSupervisor::new(record, stream, Arc::new(config), store)
    }

    #[tokio::test]
    async fn spawn_failure_returns_to_idle_and_persists() {
        let store = Arc::new(MemoryTaskStore::new());
        let supervisor = supervisor("/nonexistent/forwarder-binary", Arc::clone(&store));

        let err = supervisor.spawn().await.unwrap_err();
        match &err {
            Error::Spawn {
                task_id,
                platform,
                command,
                ..
            } => {
                assert_eq!(task_id, supervisor.task_id());
                assert_eq!(platform, "wx");
                assert!(command.starts_with("/nonexistent/forwarder-binary -stream_loop -1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let snapshot = supervisor.snapshot();
        assert_eq!(snapshot.state, SupervisorState::Idle);
        assert_eq!(snapshot.pid, 0);
        assert_eq!(snapshot.input, "rtmp://localhost/live/s1");
        assert_eq!(snapshot.output, "rtmp://localhost/live/abc");

        let stored = store.get(supervisor.task_id()).await.unwrap().expect("record persisted");
        let stored = TaskRecord::from_json(&stored).unwrap();
        assert_eq!(stored.pid, 0);
        assert!(matches!(stored.last_exit, Some(TaskExit::SpawnFailed { .. })));
    }
}
