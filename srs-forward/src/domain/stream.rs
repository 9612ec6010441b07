//! Live stream identity as reported by the media server callbacks.

use serde::{Deserialize, Serialize};

/// Vhost name SRS uses when no explicit vhost is configured.
pub const DEFAULT_VHOST: &str = "__defaultVhost__";

/// A published stream on the upstream media server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamIdentity {
    #[serde(default)]
    pub vhost: String,
    pub app: String,
    pub stream: String,
    #[serde(default)]
    pub param: String,
    #[serde(default, rename = "server_id")]
    pub server: String,
    #[serde(default, rename = "client_id")]
    pub client: String,
    #[serde(default)]
    pub update: String,
}

impl StreamIdentity {
    pub fn new(vhost: impl Into<String>, app: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            vhost: vhost.into(),
            app: app.into(),
            stream: stream.into(),
            ..Default::default()
        }
    }

    /// Canonical `vhost/app/stream` path, with the default vhost omitted.
    pub fn stream_url(&self) -> String {
        if self.vhost.is_empty() || self.vhost == DEFAULT_VHOST {
            format!("{}/{}", self.app, self.stream)
        } else {
            format!("{}/{}/{}", self.vhost, self.app, self.stream)
        }
    }

    /// RTMP URL the forwarder pulls from on the given host.
    pub fn input_url(&self, host: &str) -> String {
        format!("rtmp://{}/{}/{}", host, self.app, self.stream)
    }
}

impl std::fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vhost={}, app={}, stream={}, param={}, server={}, client={}, update={}",
            self.vhost, self.app, self.stream, self.param, self.server, self.client, self.update
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vhost_is_omitted() {
        let stream = StreamIdentity::new(DEFAULT_VHOST, "live", "s1");
        assert_eq!(stream.stream_url(), "live/s1");
    }

    #[test]
    fn custom_vhost_is_kept() {
        let stream = StreamIdentity::new("example.com", "live", "s1");
        assert_eq!(stream.stream_url(), "example.com/live/s1");
    }

    #[test]
    fn input_url_uses_host() {
        let stream = StreamIdentity::new(DEFAULT_VHOST, "live", "s1");
        assert_eq!(stream.input_url("localhost"), "rtmp://localhost/live/s1");
    }

    #[test]
    fn deserializes_callback_payload() {
        let json = r#"{"vhost":"__defaultVhost__","app":"live","stream":"s1","param":"?k=v","server_id":"vid-1","client_id":"c-9"}"#;
        let stream: StreamIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(stream.server, "vid-1");
        assert_eq!(stream.client, "c-9");
        assert_eq!(stream.param, "?k=v");
        assert!(stream.update.is_empty());
    }
}
