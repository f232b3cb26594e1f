//! Configuration management for the admission client.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::flow::FlowConfig;
use crate::grants::{FileGrantStore, GrantStore, InMemoryGrantStore};
use crate::hold::DEFAULT_MAX_TICKETS_PER_EVENT;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use turnstile_runtime::retry::RetryPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Remote service endpoints
    pub services: ServiceConfig,
    /// Queue protocol tunables
    pub queue: QueueConfig,
    /// Hold limits
    pub holds: HoldConfig,
    /// JSON file for persisted grants; in-memory when unset
    pub grant_store_path: Option<String>,
}

/// Remote service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Admission-control service base URL
    pub queue_url: String,
    /// Reservation service base URL
    pub reservation_url: String,
    /// Per-request timeout in milliseconds
    pub http_timeout_ms: u64,
}

/// Queue protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queues shorter than this are bypassed
    pub fast_pass_threshold: u32,
    /// Base poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Upper bound of random delay added to each poll, in milliseconds
    pub poll_jitter_ms: u64,
    /// Eviction restarts before giving up
    pub max_rejoin_attempts: u32,
    /// Failed joins retried before giving up
    pub max_join_retries: u32,
    /// First rate-limit backoff in milliseconds
    pub backoff_initial_ms: u64,
    /// Longest rate-limit backoff in milliseconds
    pub backoff_max_ms: u64,
    /// How long to wait in line before giving up, in seconds
    pub outcome_timeout_secs: u64,
}

/// Hold configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldConfig {
    /// Seats a caller may hold per event
    pub max_tickets_per_event: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str, default| parse_or(lookup(key), default);
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            services: ServiceConfig {
                queue_url: string("QUEUE_SERVICE_URL", "http://localhost:8080/api"),
                reservation_url: string("RESERVATION_SERVICE_URL", "http://localhost:8080/api"),
                http_timeout_ms: parse_or(lookup("HTTP_TIMEOUT_MS"), 10_000),
            },
            queue: QueueConfig {
                fast_pass_threshold: parsed("QUEUE_FAST_PASS_THRESHOLD", 10),
                poll_interval_ms: parse_or(lookup("QUEUE_POLL_INTERVAL_MS"), 5_000),
                poll_jitter_ms: parse_or(lookup("QUEUE_POLL_JITTER_MS"), 2_000),
                max_rejoin_attempts: parsed("QUEUE_MAX_REJOIN_ATTEMPTS", 3),
                max_join_retries: parsed("QUEUE_MAX_JOIN_RETRIES", 3),
                backoff_initial_ms: parse_or(lookup("QUEUE_BACKOFF_INITIAL_MS"), 5_000),
                backoff_max_ms: parse_or(lookup("QUEUE_BACKOFF_MAX_MS"), 60_000),
                outcome_timeout_secs: parse_or(lookup("QUEUE_OUTCOME_TIMEOUT_SECS"), 1_800),
            },
            holds: HoldConfig {
                max_tickets_per_event: parsed("MAX_TICKETS_PER_EVENT", DEFAULT_MAX_TICKETS_PER_EVENT),
            },
            grant_store_path: lookup("GRANT_STORE_PATH").filter(|path| !path.trim().is_empty()),
        }
    }

    /// Per-request HTTP timeout
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.services.http_timeout_ms)
    }

    /// How long the gate waits for a flow outcome
    #[must_use]
    pub const fn outcome_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.outcome_timeout_secs)
    }

    /// Queue flow tunables
    #[must_use]
    pub fn flow_config(&self) -> FlowConfig {
        let jitter = Duration::from_millis(self.queue.poll_jitter_ms);
        FlowConfig {
            fast_pass_threshold: self.queue.fast_pass_threshold,
            poll_interval: Duration::from_millis(self.queue.poll_interval_ms),
            poll_jitter: jitter,
            max_rejoin_attempts: self.queue.max_rejoin_attempts,
            max_join_retries: self.queue.max_join_retries,
            backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(self.queue.backoff_initial_ms))
                .max_delay(Duration::from_millis(self.queue.backoff_max_ms))
                .multiplier(2.0)
                .jitter(jitter)
                .build(),
        }
    }

    /// Grant storage selected by `GRANT_STORE_PATH`
    #[must_use]
    pub fn grant_store(&self) -> Arc<dyn GrantStore> {
        match &self.grant_store_path {
            Some(path) => Arc::new(FileGrantStore::new(path)),
            None => Arc::new(InMemoryGrantStore::new()),
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
