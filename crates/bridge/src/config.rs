use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::route::ErrorSink;

/// Connection configuration.
///
/// Immutable once the underlying connection is built; an exception handler
/// attached later via [`Client::exception_handler`](crate::Client::exception_handler)
/// is still honored by appending it to the live failure route.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Broker URLs; the first one is the primary connection target.
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,

    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Whether the backend may reconnect after a connection loss.
    /// Disabled by default: the bridge fails fast unless asked otherwise.
    #[serde(default)]
    pub auto_reconnect: bool,

    /// Whether to flush buffered outbound data on a fixed interval.
    #[serde(default)]
    pub periodic_flush: bool,

    /// Interval between periodic flushes, in milliseconds.
    #[serde(default = "default_periodic_flush_interval_ms")]
    pub periodic_flush_interval_ms: u64,

    /// Client connection name reported to the broker.
    #[serde(default)]
    pub name: Option<String>,

    /// Failure sink installed at connection time. Attached after the
    /// default logging sink, never replacing it.
    #[serde(skip)]
    pub exception_handler: Option<Arc<dyn ErrorSink>>,
}

fn default_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}

const fn default_connection_timeout_secs() -> u64 {
    5
}

const fn default_periodic_flush_interval_ms() -> u64 {
    500
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            connection_timeout_secs: default_connection_timeout_secs(),
            auto_reconnect: false,
            periodic_flush: false,
            periodic_flush_interval_ms: default_periodic_flush_interval_ms(),
            name: None,
            exception_handler: None,
        }
    }
}

impl ClientConfig {
    /// Installs a failure sink to attach when the client is built.
    #[must_use]
    pub fn with_exception_handler(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.exception_handler = Some(sink);
        self
    }

    /// The primary connection target.
    #[must_use]
    pub fn primary_url(&self) -> &str {
        self.urls
            .first()
            .map_or("nats://localhost:4222", String::as_str)
    }

    /// Connection timeout as a [`Duration`].
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Periodic flush interval as a [`Duration`].
    #[must_use]
    pub const fn periodic_flush_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_flush_interval_ms)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("urls", &self.urls)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("periodic_flush", &self.periodic_flush)
            .field(
                "periodic_flush_interval_ms",
                &self.periodic_flush_interval_ms,
            )
            .field("name", &self.name)
            .field("exception_handler", &self.exception_handler.is_some())
            .finish()
    }
}

/// Options for the stream façade returned by
/// [`Client::jet_stream`](crate::Client::jet_stream).
#[derive(Clone, Debug, Default)]
pub struct JetStreamOptions {
    /// Upper bound on how long a single publish may wait for its broker
    /// acknowledgement. `None` waits indefinitely.
    pub publish_timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnection_is_disabled_by_default() {
        let config = ClientConfig::default();
        assert!(!config.auto_reconnect);
        assert!(!config.periodic_flush);
        assert_eq!(config.connection_timeout(), Duration::from_secs(5));
        assert_eq!(config.primary_url(), "nats://localhost:4222");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"urls": ["nats://broker:4222"]}"#).unwrap();
        assert_eq!(config.primary_url(), "nats://broker:4222");
        assert!(!config.auto_reconnect);
        assert_eq!(config.periodic_flush_interval(), Duration::from_millis(500));
    }
}
