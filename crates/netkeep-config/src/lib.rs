//! Shared configuration for the netkeep server and its per-connection agents.
//!
//! Both binaries resolve the same [`Config`] through `ortho_config`, layering
//! built-in defaults, an optional TOML file (`--config-path`), `NETKEEP_*`
//! environment variables, and command-line flags in increasing order of
//! precedence. Agreeing on a single definition keeps the server socket and the
//! runtime artefact layout consistent between the daemon and the agents that
//! connect to it.

mod defaults;
mod logging;
mod runtime;
mod socket;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_EVENT_JOURNAL_CAPACITY, DEFAULT_LOG_FILTER, DEFAULT_MAX_FRAME_BYTES,
    DEFAULT_MODULE_DRAIN_TIMEOUT_MS, DEFAULT_NOTIFICATION_POLL_MS, DEFAULT_TCP_PORT,
    default_log_filter, default_log_filter_string, default_log_format, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved configuration shared by `netkeepd` and `netkeep-agent`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "NETKEEP")]
pub struct Config {
    /// Socket the server listens on and agents connect to.
    #[ortho_config(default = defaults::default_socket_endpoint())]
    pub server_socket: SocketEndpoint,
    /// `tracing` filter expression applied to log output.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Upper bound for a single protocol message received from a client.
    #[ortho_config(default = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
    /// Number of events retained by the server for notification replay.
    #[ortho_config(default = DEFAULT_EVENT_JOURNAL_CAPACITY)]
    pub event_journal_capacity: usize,
    /// How long module removal waits for in-flight calls to drain.
    #[ortho_config(default = DEFAULT_MODULE_DRAIN_TIMEOUT_MS)]
    pub module_drain_timeout_ms: u64,
    /// Interval at which notification workers poll the server for events.
    #[ortho_config(default = DEFAULT_NOTIFICATION_POLL_MS)]
    pub notification_poll_ms: u64,
    /// Names of built-in modules that start disabled.
    #[serde(default)]
    #[ortho_config(default = Vec::new())]
    pub disabled_modules: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_socket: defaults::default_socket_endpoint(),
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            event_journal_capacity: DEFAULT_EVENT_JOURNAL_CAPACITY,
            module_drain_timeout_ms: DEFAULT_MODULE_DRAIN_TIMEOUT_MS,
            notification_poll_ms: DEFAULT_NOTIFICATION_POLL_MS,
            disabled_modules: Vec::new(),
        }
    }
}

impl Config {
    /// Socket endpoint shared by the server and its agents.
    #[must_use]
    pub fn server_socket(&self) -> &SocketEndpoint {
        &self.server_socket
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Maximum accepted size of one client protocol message.
    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Capacity of the server event journal; never zero.
    #[must_use]
    pub fn event_journal_capacity(&self) -> usize {
        self.event_journal_capacity.max(1)
    }

    /// Bounded wait applied when removing a module with calls in flight.
    #[must_use]
    pub fn module_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.module_drain_timeout_ms)
    }

    /// Poll interval used by notification delivery workers.
    #[must_use]
    pub fn notification_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notification_poll_ms.max(1))
    }

    /// Built-in modules that should be registered disabled.
    #[must_use]
    pub fn disabled_modules(&self) -> &[String] {
        &self.disabled_modules
    }

    /// Reports whether the named module starts disabled.
    #[must_use]
    pub fn is_module_disabled(&self, name: &str) -> bool {
        self.disabled_modules.iter().any(|entry| entry == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent_with_constants() {
        let config = Config::default();
        assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(config.max_frame_bytes(), DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(
            config.notification_poll_interval(),
            Duration::from_millis(DEFAULT_NOTIFICATION_POLL_MS)
        );
        assert!(config.disabled_modules().is_empty());
    }

    #[test]
    fn zero_journal_capacity_is_clamped() {
        let config = Config {
            event_journal_capacity: 0,
            ..Config::default()
        };
        assert_eq!(config.event_journal_capacity(), 1);
    }

    #[test]
    fn disabled_modules_are_matched_by_name() {
        let config = Config {
            disabled_modules: vec![String::from("monitoring")],
            ..Config::default()
        };
        assert!(config.is_module_disabled("monitoring"));
        assert!(!config.is_module_disabled("system"));
    }
}
