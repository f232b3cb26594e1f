//! # Admission
//!
//! Client side of a virtual waiting room for high-demand ticket sales.
//!
//! - [`client`] talks to the admission-control and reservation services and
//!   classifies every failure into [`error::QueueError`] or
//!   [`error::ReservationError`]
//! - [`flow`] is the queue state machine: status check, join, poll, claim,
//!   with fast-pass bypass and fail-open behaviour
//! - [`gate::AdmissionGate`] decides whether a caller needs the queue at all
//! - [`hold::HoldOrchestrator`] turns a seat selection plus admission into a
//!   time-limited hold
//!
//! ## Example
//!
//! ```no_run
//! use admission::{AdmissionGate, Config, HoldRequest};
//! use admission::client::{HttpQueueClient, HttpReservationClient};
//! use admission::flow::QueueEnvironment;
//! use admission::types::{CallerId, Customer, SeatSelection, SectionId, ShowId};
//! use std::sync::Arc;
//! use turnstile_core::environment::SystemClock;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::from_env();
//! let grants = config.grant_store();
//! let clock = Arc::new(SystemClock);
//!
//! let queue = HttpQueueClient::new(&config.services.queue_url, config.http_timeout())?;
//! let gate = AdmissionGate::new(
//!     QueueEnvironment::new(Arc::new(queue), grants, clock, config.flow_config()),
//!     config.outcome_timeout(),
//! );
//!
//! let show = ShowId::new("S2");
//! let admission = gate.admit(&show, &CallerId::new("caller-1"), None).await?;
//!
//! let reservations =
//!     HttpReservationClient::new(&config.services.reservation_url, config.http_timeout())?;
//! let holds = gate.hold_orchestrator(Arc::new(reservations));
//! let hold = holds
//!     .create_hold(
//!         &HoldRequest {
//!             show_id: show,
//!             selection: SeatSelection::new([(SectionId::new("VIP"), 2)]),
//!             customer: Customer {
//!                 email: "ada@example.com".to_string(),
//!                 name: "Ada".to_string(),
//!             },
//!         },
//!         Some(&admission),
//!     )
//!     .await?;
//! println!("holding {:?} until {}", hold.seat_ids, hold.expires_at);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod fakes;
pub mod flow;
pub mod gate;
pub mod grants;
pub mod hold;
pub mod types;

pub use config::Config;
pub use error::{FlowError, GrantStoreError, HoldError, NextAction, QueueError, ReservationError};
pub use flow::{BypassReason, FlowConfig, FlowOutcome, QueueFlow, QueuePhase};
pub use gate::{Admission, AdmissionGate, GateDecision};
pub use grants::{FileGrantStore, GrantStore, InMemoryGrantStore};
pub use hold::{HoldOrchestrator, HoldRequest, select_seats};
