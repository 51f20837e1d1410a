use std::time::Duration;

use coframe_core::locator::DEFAULT_SCHEME;

/// Tuning knobs for a sync session's background tasks.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the upload pump scans the working copy for pending edits.
    pub upload_interval: Duration,
    /// Initial delay before a failed subscribe is retried.
    pub retry_backoff: Duration,
    /// Ceiling for the doubling retry delay.
    pub max_retry_backoff: Duration,
    /// Consecutive failures after which a task raises its degraded flag.
    pub max_consecutive_failures: u32,
    /// Upper bound on distinct authors tracked in the shadow set. `None`
    /// means unbounded; records from authors past the bound are dropped
    /// with a warning.
    pub max_shadow_authors: Option<usize>,
    /// Scheme used when formatting dataset locators at share time.
    pub scheme: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            upload_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(250),
            max_retry_backoff: Duration::from_secs(5),
            max_consecutive_failures: 5,
            max_shadow_authors: None,
            scheme: DEFAULT_SCHEME.to_string(),
        }
    }
}
