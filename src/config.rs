//! Tunables for [`crate::server::Server`] and [`crate::client::Client`].
//!
//! Kept as plain `Default`-able structs, the way `TransportConfig` is
//! structured in the crate this one started from, rather than threading
//! every tunable through every constructor call.

use std::time::Duration;

/// Server-side tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How often the accept loop wakes up to check for a pending connection
    /// and for a stop request, when no connection is immediately ready.
    pub accept_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            accept_poll_interval: Duration::from_millis(200),
        }
    }
}

/// Client-side tunables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout applied to the initial connect.
    pub connect_timeout: Duration,
    /// Interval a blocking retry loop sleeps between attempts after a
    /// `Reject` acknowledgement.
    pub retry_interval: Duration,
    /// Total time budget a blocking retry loop is allowed to spend retrying
    /// before giving up and reporting a timeout.
    pub retry_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Duration::from_secs(30),
            retry_interval: Duration::from_millis(1000),
            retry_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Number of retries a blocking operation gets before it reports a
    /// timeout, derived from `retry_timeout` / `retry_interval`. At least 1,
    /// matching the reference client's rule that a zero interval still
    /// allows a single attempt rather than looping forever.
    pub fn retry_count_budget(&self) -> u32 {
        if self.retry_interval.is_zero() {
            return 1;
        }
        let budget = self.retry_timeout.as_secs_f64() / self.retry_interval.as_secs_f64();
        budget.floor().max(1.0) as u32
    }
}
