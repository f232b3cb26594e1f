//! Environment for the queue flow reducer.

use crate::client::QueueService;
use crate::grants::GrantStore;
use std::sync::Arc;
use std::time::Duration;
use turnstile_core::environment::Clock;
use turnstile_runtime::retry::RetryPolicy;

/// Tunables of the queue protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowConfig {
    /// Queues shorter than this are bypassed
    pub fast_pass_threshold: u32,
    /// Base delay between position polls
    pub poll_interval: Duration,
    /// Uniform random delay added to every poll and backoff
    pub poll_jitter: Duration,
    /// Restarts after eviction before giving up
    pub max_rejoin_attempts: u32,
    /// Failed joins retried before giving up; also bounds grants that
    /// arrive already expired
    pub max_join_retries: u32,
    /// Backoff after rate limiting or failed joins
    pub backoff: RetryPolicy,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            fast_pass_threshold: 10,
            poll_interval: Duration::from_secs(5),
            poll_jitter: Duration::from_secs(2),
            max_rejoin_attempts: 3,
            max_join_retries: 3,
            backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_secs(5))
                .max_delay(Duration::from_secs(60))
                .multiplier(2.0)
                .jitter(Duration::from_secs(2))
                .build(),
        }
    }
}

impl FlowConfig {
    /// Delay before the next regular poll
    #[must_use]
    pub fn next_poll_delay(&self) -> Duration {
        jitter(self.poll_interval, self.poll_jitter)
    }

    /// Delay after the `strike`-th consecutive failure (1-based).
    ///
    /// Never shorter than the regular poll interval or the server's
    /// `Retry-After`.
    #[must_use]
    pub fn backoff_delay(&self, strike: u32, retry_after: Option<Duration>) -> Duration {
        let attempt = usize::try_from(strike.saturating_sub(1)).unwrap_or(usize::MAX);
        let base = self
            .backoff
            .delay_for_attempt(attempt)
            .max(self.poll_interval)
            .max(retry_after.unwrap_or_default());
        self.backoff.jittered(base)
    }
}

fn jitter(base: Duration, bound: Duration) -> Duration {
    RetryPolicy::builder().jitter(bound).build().jittered(base)
}

/// Dependencies of the queue flow.
#[derive(Clone)]
pub struct QueueEnvironment {
    queue: Arc<dyn QueueService>,
    grants: Arc<dyn GrantStore>,
    clock: Arc<dyn Clock>,
    config: FlowConfig,
}

impl QueueEnvironment {
    /// Create an environment
    #[must_use]
    pub fn new(
        queue: Arc<dyn QueueService>,
        grants: Arc<dyn GrantStore>,
        clock: Arc<dyn Clock>,
        config: FlowConfig,
    ) -> Self {
        Self {
            queue,
            grants,
            clock,
            config,
        }
    }

    /// Admission-control service
    #[must_use]
    pub fn queue(&self) -> Arc<dyn QueueService> {
        Arc::clone(&self.queue)
    }

    /// Local grant storage
    #[must_use]
    pub fn grants(&self) -> &dyn GrantStore {
        self.grants.as_ref()
    }

    /// Shared handle to the grant storage
    #[must_use]
    pub fn grant_store(&self) -> Arc<dyn GrantStore> {
        Arc::clone(&self.grants)
    }

    /// Time source
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Shared handle to the time source
    #[must_use]
    pub fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Protocol tunables
    #[must_use]
    pub const fn config(&self) -> &FlowConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: Duration) -> FlowConfig {
        FlowConfig {
            poll_interval: Duration::from_secs(5),
            poll_jitter: jitter,
            backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_secs(5))
                .max_delay(Duration::from_secs(60))
                .jitter(jitter)
                .build(),
            ..FlowConfig::default()
        }
    }

    #[test]
    fn test_backoff_grows_and_respects_retry_after() {
        let config = config(Duration::ZERO);
        assert_eq!(config.backoff_delay(1, None), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(2, None), Duration::from_secs(10));
        assert_eq!(config.backoff_delay(3, None), Duration::from_secs(20));
        assert_eq!(config.backoff_delay(10, None), Duration::from_secs(60));
        assert_eq!(
            config.backoff_delay(1, Some(Duration::from_secs(30))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_poll_delay_is_jittered_within_bound() {
        let config = config(Duration::from_secs(2));
        for _ in 0..50 {
            let delay = config.next_poll_delay();
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(7));
        }
    }
}
