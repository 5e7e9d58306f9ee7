//! Resolver configuration.

use std::time::Duration;

/// Default timeout for one child-object fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for an auxiliary record count.
pub const DEFAULT_COUNT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the response channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Child resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upper bound for one child-object fetch.
    pub fetch_timeout: Duration,

    /// Upper bound for a record count; a slower count yields no result.
    pub count_timeout: Duration,

    /// Responses buffered before fetch tasks wait.
    pub channel_capacity: usize,
}

impl ResolverConfig {
    /// Create a configuration with default timeouts.
    pub fn new() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            count_timeout: DEFAULT_COUNT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the count timeout.
    pub fn with_count_timeout(mut self, timeout: Duration) -> Self {
        self.count_timeout = timeout;
        self
    }

    /// Set the response channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::new()
    }
}
