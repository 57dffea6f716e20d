// Event bus configuration
//
// Defaults match the observed production values: 10 connections per user,
// a 1000-entry dispatch queue, 100-entry connection queues, a 10 second
// heartbeat, and a 30 minute cleanup cycle.

use std::time::Duration;

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Connections one user may hold before the oldest is evicted
    pub max_connections_per_user: usize,
    /// Capacity of the central dispatch queue (overflow rejects, logged)
    pub dispatch_queue_capacity: usize,
    /// Capacity of each per-connection queue (overflow drops oldest, silent)
    pub stream_queue_capacity: usize,
    /// Idle time on a connection before a heartbeat frame is emitted
    pub heartbeat_interval: Duration,
    /// Time between cleanup cycles
    pub cleanup_interval: Duration,
    /// How long the distributor blocks per poll; bounds shutdown latency
    pub dispatch_poll_interval: Duration,
    /// Bound on joining each worker task during shutdown
    pub shutdown_join_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_connections_per_user: 10,
            dispatch_queue_capacity: 1000,
            stream_queue_capacity: 100,
            heartbeat_interval: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(30 * 60),
            dispatch_poll_interval: Duration::from_millis(500),
            shutdown_join_timeout: Duration::from_secs(10),
        }
    }
}

impl BusConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections_per_user: env_parse(
                "BEACON_MAX_CONNECTIONS_PER_USER",
                defaults.max_connections_per_user,
            ),
            dispatch_queue_capacity: env_parse(
                "BEACON_DISPATCH_QUEUE_CAPACITY",
                defaults.dispatch_queue_capacity,
            ),
            stream_queue_capacity: env_parse(
                "BEACON_STREAM_QUEUE_CAPACITY",
                defaults.stream_queue_capacity,
            ),
            heartbeat_interval: Duration::from_secs(env_parse(
                "BEACON_HEARTBEAT_SECONDS",
                defaults.heartbeat_interval.as_secs(),
            )),
            cleanup_interval: Duration::from_secs(
                env_parse(
                    "BEACON_CLEANUP_MINUTES",
                    defaults.cleanup_interval.as_secs() / 60,
                ) * 60,
            ),
            ..defaults
        }
    }

    /// Set the per-user connection cap
    pub fn with_max_connections_per_user(mut self, max: usize) -> Self {
        self.max_connections_per_user = max;
        self
    }

    /// Set the per-connection queue capacity
    pub fn with_stream_queue_capacity(mut self, capacity: usize) -> Self {
        self.stream_queue_capacity = capacity;
        self
    }

    /// Set the cleanup cycle interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the heartbeat idle timeout
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
