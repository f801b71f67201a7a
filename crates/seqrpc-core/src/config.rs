//! Centralized configuration for seqrpc.
//!
//! Constants live on unit structs grouped by concern; `ServerConfig` carries the
//! values an operator can change at startup.

use std::time::Duration;

/// Wire-level limits.
pub struct WireConfig;

impl WireConfig {
    /// Largest payload accepted in a single frame.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    /// Size of the big-endian length prefix.
    pub const LENGTH_PREFIX_SIZE: usize = 4;
}

/// Client connection settings.
pub struct ClientConfig;

impl ClientConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Defaults applied when the server is started without explicit settings.
pub struct ServerDefaults;

impl ServerDefaults {
    pub const BACKLOG: usize = 1024;
    pub const MAX_IN_FLIGHT: usize = 256;
    pub const FALLBACK_WORKERS: usize = 4;
    pub const SERVICES_FILE: &'static str = "services.json";
}

/// Runtime settings for an `RpcServer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Number of worker tasks processing requests.
    pub workers: usize,
    /// Capacity of the backlog between connection readers and workers.
    pub backlog: usize,
    /// Requests read from one connection whose responses are not yet written.
    /// The connection stops reading while at the limit.
    pub max_in_flight: usize,
    /// Upper bound on processing time for any request. `None` waits indefinitely.
    pub request_deadline: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(ServerDefaults::FALLBACK_WORKERS);

        Self {
            workers,
            backlog: ServerDefaults::BACKLOG,
            max_in_flight: ServerDefaults::MAX_IN_FLIGHT,
            request_deadline: None,
        }
    }
}

impl ServerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_request_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.request_deadline = deadline;
        self
    }
}
