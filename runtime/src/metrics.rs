//! Metric names and descriptions.
//!
//! Counters are emitted through the `metrics` facade; installing an exporter
//! is left to the embedding application. Call [`register_metrics`] once at
//! startup so exporters can show descriptions.

use metrics::describe_counter;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Effects started by a Store, labelled by `type`.
pub const EFFECTS_EXECUTED: &str = "store.effects.executed";

/// Cancellable effects aborted by `Effect::Cancel` or shutdown.
pub const EFFECTS_CANCELLED: &str = "store.effects.cancelled";

/// Admission-control requests, labelled by `operation` and `outcome`.
pub const QUEUE_REQUESTS: &str = "admission.queue.requests";

/// Hold requests, labelled by `outcome`.
pub const HOLD_REQUESTS: &str = "admission.holds.requests";

/// Queue flow terminal outcomes, labelled by `outcome`.
pub const FLOW_OUTCOMES: &str = "admission.flow.outcomes";

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(EFFECTS_EXECUTED, "Total number of effects started by stores");
    describe_counter!(EFFECTS_CANCELLED, "Total number of cancellable effects aborted");
    describe_counter!(QUEUE_REQUESTS, "Requests sent to the admission-control service");
    describe_counter!(HOLD_REQUESTS, "Hold requests by outcome");
    describe_counter!(FLOW_OUTCOMES, "Queue flows that reached a terminal state");
}
