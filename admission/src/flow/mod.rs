//! The client-side queue state machine.
//!
//! # Architecture
//!
//! ```text
//! QueueFlow::start ──► QueueReducer ──► Effect (cancellable request/timer)
//!        ▲                   │                     │
//!        │                   ▼                     ▼
//!   QueueFlow::leave    QueueFlowState     Store executes, feeds the
//!   (cancels first)                        result action back in
//! ```
//!
//! The reducer is pure: it never awaits and never touches the network. Every
//! request and timer is an [`Effect`](turnstile_core::effect::Effect)
//! registered under a fixed id in the flow's own `Store`, so leaving or
//! dropping the flow cancels exactly the work it started.
//!
//! Responses can still arrive after the state moved on. Each result carries
//! the generation it was issued in, and position polls also carry a sequence
//! number; stale results are dropped.

pub mod actions;
pub mod environment;
pub mod reducer;
pub mod store;
#[cfg(test)]
mod tests;
pub mod types;

pub use actions::QueueAction;
pub use environment::{FlowConfig, QueueEnvironment};
pub use reducer::QueueReducer;
pub use store::QueueFlow;
pub use types::{BypassReason, FlowOutcome, FlowSession, QueueFlowState, QueuePhase};
