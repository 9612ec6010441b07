//! Forwarding destination configuration.

use serde::{Deserialize, Serialize};

/// One third-party endpoint the live stream is forwarded to.
///
/// The `platform` id is the registry key; a config is never edited while its task
/// runs, a changed config means stopping and starting the platform again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Platform id, for example `wx`.
    pub platform: String,
    /// RTMP server, for example `rtmp://localhost/live`.
    pub server: String,
    /// Stream key appended to the server.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub enabled: bool,
    /// User-defined target rather than a built-in preset.
    #[serde(default, alias = "custom")]
    pub customed: bool,
    #[serde(default)]
    pub label: String,
}

impl DestinationConfig {
    pub fn new(
        platform: impl Into<String>,
        server: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            server: server.into(),
            secret: secret.into(),
            enabled: true,
            ..Default::default()
        }
    }

    /// Output URL with `localhost` replaced by `host` and a single `/` before the secret.
    pub fn output_url(&self, host: &str) -> String {
        let server = self.server.replace("localhost", host);
        let server = server.trim_end_matches('/');
        let secret = self.secret.trim_start_matches('/');

        if secret.is_empty() {
            server.to_string()
        } else {
            format!("{server}/{secret}")
        }
    }
}

impl std::fmt::Display for DestinationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The secret is a stream key; only its length is logged.
        write!(
            f,
            "platform={}, server={}, secret={}B, enabled={}, customed={}, label={}",
            self.platform,
            self.server,
            self.secret.len(),
            self.enabled,
            self.customed,
            self.label
        )
    }
}
