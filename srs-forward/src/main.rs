use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use srs_forward::config::ForwardConfig;
use srs_forward::forward::{ForwardEvent, ForwardReply, ForwardService, TaskRegistry};
use srs_forward::logging;
use srs_forward::store::{MemoryTaskStore, SqliteTaskStore, TaskStore};

/// Reads one JSON [`ForwardEvent`] per line from stdin and writes one JSON
/// [`ForwardReply`] per line to stdout. EOF or Ctrl-C stops every task.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    logging::init()?;

    let config = Arc::new(ForwardConfig::from_env()?);

    let store: Arc<dyn TaskStore> = if config.uses_memory_store() {
        warn!("Using in-memory task store, task state will not survive restarts");
        Arc::new(MemoryTaskStore::new())
    } else {
        Arc::new(
            SqliteTaskStore::connect(&config.database_url)
                .await
                .with_context(|| format!("open task store {}", config.database_url))?,
        )
    };

    let registry = Arc::new(TaskRegistry::new(Arc::clone(&config), Arc::clone(&store)));
    let service = ForwardService::new(registry, store);
    service.recover().await.context("recover task records")?;

    info!(
        "srs-forward ready, ffmpeg={}, host={}",
        config.ffmpeg.binary_path, config.runtime_host
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read event: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let reply = match serde_json::from_str::<ForwardEvent>(&line) {
                    Ok(event) => service.handle(event).await,
                    Err(e) => ForwardReply::Error {
                        message: format!("invalid event: {e}"),
                    },
                };

                let mut out = serde_json::to_string(&reply)?;
                out.push('\n');
                stdout.write_all(out.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
    }

    service.shutdown().await?;
    info!("srs-forward stopped");
    Ok(())
}
