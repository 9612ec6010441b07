//! Runtime configuration, loaded from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default host substituted for `localhost` in forwarding URLs.
pub const DEFAULT_RUNTIME_HOST: &str = "localhost";

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:srs-forward.db?mode=rwc";

/// Forwarder binary invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Path to ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub binary_path: String,
    /// Arguments placed before the forwarding template (e.g. `-hide_banner`).
    #[serde(default)]
    pub global_args: Vec<String>,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary_path: default_ffmpeg_path(),
            global_args: Vec::new(),
        }
    }
}

/// Configuration for the forwarding supervisors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardConfig {
    pub ffmpeg: FfmpegConfig,
    /// Host the forwarder reaches the media server on.
    pub runtime_host: String,
    /// Pause after a process had run, before its supervisor reports cleanup done.
    pub restart_delay: Duration,
    /// How often a running task's record is written to the store.
    pub checkpoint_interval: Duration,
    /// `sqlite:` URL, or `memory` for a non-durable store.
    pub database_url: String,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            ffmpeg: FfmpegConfig::default(),
            runtime_host: DEFAULT_RUNTIME_HOST.to_string(),
            restart_delay: Duration::from_secs(1),
            checkpoint_interval: Duration::from_secs(10),
            database_url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

impl ForwardConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let ffmpeg = FfmpegConfig {
            binary_path: lookup("FFMPEG_PATH").unwrap_or(defaults.ffmpeg.binary_path),
            global_args: lookup("FFMPEG_GLOBAL_ARGS")
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        };

        let restart_delay = match lookup("FORWARD_RESTART_DELAY_MS") {
            Some(v) => Duration::from_millis(parse_number("FORWARD_RESTART_DELAY_MS", &v)?),
            None => defaults.restart_delay,
        };

        let checkpoint_interval = match lookup("FORWARD_CHECKPOINT_INTERVAL_SECS") {
            Some(v) => {
                let secs = parse_number("FORWARD_CHECKPOINT_INTERVAL_SECS", &v)?;
                if secs == 0 {
                    return Err(Error::config(
                        "FORWARD_CHECKPOINT_INTERVAL_SECS must be greater than 0",
                    ));
                }
                Duration::from_secs(secs)
            }
            None => defaults.checkpoint_interval,
        };

        let runtime_host = lookup("FORWARD_RUNTIME_HOST")
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(defaults.runtime_host);

        Ok(Self {
            ffmpeg,
            runtime_host,
            restart_delay,
            checkpoint_interval,
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.eq_ignore_ascii_case("memory")
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::config(format!("Invalid {key} '{value}': {e}")))
}
