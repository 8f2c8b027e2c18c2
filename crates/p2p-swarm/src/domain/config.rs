//! Swarm configuration.

use serde::Deserialize;
use std::time::Duration;

use super::errors::ConfigError;

/// Default listen port of an overlay node.
pub const DEFAULT_LISTEN_PORT: u16 = 7513;

/// Runtime configuration of a swarm.
///
/// Every field has a default, so a partial TOML table is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Outgoing neighbors the neighborhood manager maintains
    pub target_outgoing_peers: usize,
    /// Run the neighborhood manager
    pub gossip: bool,
    /// Bootstrap peer selection before the neighborhood manager starts
    pub bootstrap: bool,
    /// Listen port; the node address is `127.0.0.1:<port>`
    pub listen_port: u16,
    /// Accepted clock skew for message timestamps, in seconds
    pub clock_skew_tolerance_secs: u64,
    /// Bound on one peering round's dials in ms
    pub connect_timeout_ms: u64,
    /// Delay before retrying an unsuccessful peering round in ms
    pub no_results_retry_ms: u64,
    /// Periodic neighborhood check in ms
    pub refresh_interval_ms: u64,
    /// Per-protocol delivery queue capacity
    pub protocol_queue_capacity: usize,
    /// Per-subscriber peer event queue capacity
    pub peer_event_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            target_outgoing_peers: 5,
            gossip: true,
            bootstrap: false,
            listen_port: DEFAULT_LISTEN_PORT,
            clock_skew_tolerance_secs: 600, // 10 minutes
            connect_timeout_ms: 5_000,
            no_results_retry_ms: 500,
            refresh_interval_ms: 30_000,
            protocol_queue_capacity: 256,
            peer_event_capacity: 64,
        }
    }
}

impl SwarmConfig {
    /// Small, fast configuration for tests: no gossip, short timeouts.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            target_outgoing_peers: 3,
            gossip: false,
            bootstrap: false,
            listen_port: 0,
            connect_timeout_ms: 1_000,
            no_results_retry_ms: 50,
            refresh_interval_ms: 1_000,
            ..Self::default()
        }
    }

    /// Local listen address derived from the port.
    pub fn listen_address(&self) -> String {
        format!("127.0.0.1:{}", self.listen_port)
    }

    /// Accepted clock skew as signed seconds.
    pub fn clock_skew_tolerance(&self) -> i64 {
        i64::try_from(self.clock_skew_tolerance_secs).unwrap_or(i64::MAX)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn no_results_retry(&self) -> Duration {
        Duration::from_millis(self.no_results_retry_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Reject values the swarm cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("clock_skew_tolerance_secs", self.clock_skew_tolerance_secs == 0),
            ("connect_timeout_ms", self.connect_timeout_ms == 0),
            ("refresh_interval_ms", self.refresh_interval_ms == 0),
            ("protocol_queue_capacity", self.protocol_queue_capacity == 0),
            ("peer_event_capacity", self.peer_event_capacity == 0),
        ];
        match checks.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(ConfigError::Zero { field: *field }),
            None => Ok(()),
        }
    }
}
