//! Clients for the remote admission-control and reservation services.
//!
//! Each service sits behind a trait ([`QueueService`], [`ReservationService`])
//! so the queue flow and the hold orchestrator can run against scripted fakes
//! in tests. The HTTP implementations classify every failure before
//! returning it.

pub mod queue;
pub mod reservation;
pub mod wire;

pub use queue::{HttpQueueClient, QueueService};
pub use reservation::{HttpReservationClient, NewHold, ReservationService};
