//! Reader configuration
//!
//! ```yaml
//! query_timeout_secs: 300
//! max_queue_size: 1000
//! fetch_size: 1000
//! long_operation_threshold_ms: 30000
//! marker_column: route_marker
//! retry_backoff_ms: 50
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::error::Result;

/// Consumer wait used when no query timeout is configured
pub const DEFAULT_TAKE_TIMEOUT: Duration = Duration::from_secs(600);

/// Settings for one data-to-route reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ReaderConfig {
    /// Query timeout in seconds, also the consumer wait; 0 disables the query
    /// timeout and makes consumers wait 600 seconds
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// Capacity of the handoff queue
    #[serde(default = "default_max_queue_size")]
    #[validate(range(min = 1))]
    pub max_queue_size: usize,

    /// Rows fetched per database round trip (0 = backend default)
    #[serde(default = "default_fetch_size")]
    pub fetch_size: u32,

    /// Selects slower than this are logged as warnings
    #[serde(default = "default_long_operation_threshold_ms")]
    pub long_operation_threshold_ms: u64,

    /// Result column that is non-blank for rows already routed
    #[serde(default = "default_marker_column")]
    #[validate(length(min = 1))]
    pub marker_column: String,

    /// Pause between attempts to enqueue into a full queue
    #[serde(default = "default_retry_backoff_ms")]
    #[validate(range(min = 1, max = 10000))]
    pub retry_backoff_ms: u64,
}

fn default_query_timeout_secs() -> u64 {
    300
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_fetch_size() -> u32 {
    1000
}

fn default_long_operation_threshold_ms() -> u64 {
    30_000
}

fn default_marker_column() -> String {
    "route_marker".to_string()
}

fn default_retry_backoff_ms() -> u64 {
    50
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout_secs(),
            max_queue_size: default_max_queue_size(),
            fetch_size: default_fetch_size(),
            long_operation_threshold_ms: default_long_operation_threshold_ms(),
            marker_column: default_marker_column(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ReaderConfig {
    /// Create configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query timeout in seconds
    pub fn with_query_timeout_secs(mut self, secs: u64) -> Self {
        self.query_timeout_secs = secs;
        self
    }

    /// Set the queue capacity
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the fetch size hint
    pub fn with_fetch_size(mut self, size: u32) -> Self {
        self.fetch_size = size;
        self
    }

    /// Set the slow-select warning threshold
    pub fn with_long_operation_threshold_ms(mut self, ms: u64) -> Self {
        self.long_operation_threshold_ms = ms;
        self
    }

    /// Set the marker column name
    pub fn with_marker_column(mut self, column: impl Into<String>) -> Self {
        self.marker_column = column.into();
        self
    }

    /// Set the enqueue retry backoff
    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Validate the configuration
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }

    /// Bound on a select, if any
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }

    /// How long a consumer waits for the next item
    pub fn take_timeout(&self) -> Duration {
        self.query_timeout().unwrap_or(DEFAULT_TAKE_TIMEOUT)
    }

    /// Pause between enqueue attempts
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Slow-select warning threshold
    pub fn long_operation_threshold(&self) -> Duration {
        Duration::from_millis(self.long_operation_threshold_ms)
    }
}
