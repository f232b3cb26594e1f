//! Admission gate: decides whether a caller may go straight to a hold or has
//! to wait in the queue first.

use crate::client::ReservationService;
use crate::error::FlowError;
use crate::flow::{BypassReason, FlowOutcome, QueueEnvironment, QueueFlow};
use crate::hold::HoldOrchestrator;
use crate::types::{AccessGrant, CallerId, CallerInfo, ShowId};
use std::sync::Arc;
use std::time::Duration;
use turnstile_runtime::metrics::{FLOW_OUTCOMES, counter};

/// Result of a quick admission check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// No queue in front of this show right now
    Bypass(BypassReason),
    /// A stored grant for this show is still valid
    Admitted(AccessGrant),
    /// The caller must run the queue flow
    QueueRequired,
}

/// Proof that a caller may attempt a hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The queue was skipped; holds go out without a token
    Bypassed {
        /// Why the queue was skipped
        reason: BypassReason,
    },
    /// Admitted through the queue
    Granted(AccessGrant),
}

impl Admission {
    /// The grant, if admission went through the queue
    #[must_use]
    pub const fn grant(&self) -> Option<&AccessGrant> {
        match self {
            Self::Granted(grant) => Some(grant),
            Self::Bypassed { .. } => None,
        }
    }
}

impl From<FlowOutcome> for Admission {
    fn from(outcome: FlowOutcome) -> Self {
        match outcome {
            FlowOutcome::Bypassed(reason) => Self::Bypassed { reason },
            FlowOutcome::Granted(grant) => Self::Granted(grant),
        }
    }
}

/// Routes callers either directly to hold creation or through a [`QueueFlow`].
///
/// Fails open: if the queue status cannot be read, callers are let through
/// rather than blocked.
#[derive(Clone)]
pub struct AdmissionGate {
    env: QueueEnvironment,
    outcome_timeout: Duration,
}

impl AdmissionGate {
    /// Create a gate; `outcome_timeout` bounds how long [`AdmissionGate::admit`]
    /// waits in line
    #[must_use]
    pub const fn new(env: QueueEnvironment, outcome_timeout: Duration) -> Self {
        Self {
            env,
            outcome_timeout,
        }
    }

    /// Environment shared with the flows this gate starts
    #[must_use]
    pub const fn environment(&self) -> &QueueEnvironment {
        &self.env
    }

    /// Decide without joining the queue
    pub async fn check(&self, show_id: &ShowId) -> GateDecision {
        let status = match self.env.queue().status(show_id).await {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(%show_id, %error, "Queue status unavailable, letting caller through");
                return GateDecision::Bypass(BypassReason::StatusUnavailable);
            },
        };

        if !status.is_open {
            tracing::debug!(%show_id, "Queue closed");
            return GateDecision::Bypass(BypassReason::QueueClosed);
        }

        match self.env.grants().load(show_id, self.env.clock().now()) {
            Ok(Some(grant)) => {
                tracing::debug!(%show_id, expires_at = %grant.expires_at, "Reusing stored grant");
                return GateDecision::Admitted(grant);
            },
            Ok(None) => {},
            Err(error) => tracing::warn!(%show_id, %error, "Could not read stored grants"),
        }

        if status.queue_size < self.env.config().fast_pass_threshold {
            return GateDecision::Bypass(BypassReason::BelowThreshold {
                queue_size: status.queue_size,
            });
        }

        GateDecision::QueueRequired
    }

    /// A hold orchestrator sharing this gate's grant storage and clock
    ///
    /// Grants the gate stores are the ones the orchestrator spends.
    #[must_use]
    pub fn hold_orchestrator(&self, reservations: Arc<dyn ReservationService>) -> HoldOrchestrator {
        HoldOrchestrator::new(reservations, self.env.grant_store(), self.env.shared_clock())
    }

    /// A fresh flow sharing this gate's environment
    #[must_use]
    pub fn new_flow(&self) -> QueueFlow {
        QueueFlow::new(self.env.clone())
    }

    /// Admit a caller, waiting in the queue if needed
    ///
    /// The flow is owned by this call. If it ends without admission the
    /// caller's queue membership is released.
    ///
    /// # Errors
    ///
    /// Returns the flow's [`FlowError`]; a flow that is still waiting after
    /// the gate's outcome timeout reports [`FlowError::QueueUnavailable`].
    pub async fn admit(
        &self,
        show_id: &ShowId,
        caller_id: &CallerId,
        caller_info: Option<CallerInfo>,
    ) -> Result<Admission, FlowError> {
        match self.check(show_id).await {
            GateDecision::Bypass(reason) => {
                counter!(FLOW_OUTCOMES, "outcome" => "bypassed").increment(1);
                return Ok(Admission::Bypassed { reason });
            },
            GateDecision::Admitted(grant) => return Ok(Admission::Granted(grant)),
            GateDecision::QueueRequired => {},
        }

        let flow = self.new_flow();
        let admission = self.admit_via(&flow, show_id, caller_id, caller_info).await;
        if admission.is_err() && flow.leave().await.is_err() {
            tracing::debug!(%show_id, "Flow already disposed, skipping leave");
        }
        admission
    }

    /// Run `flow` for the caller and wait for its outcome
    ///
    /// For presentation layers that keep the flow to observe progress.
    ///
    /// # Errors
    ///
    /// Same as [`AdmissionGate::admit`]; a disposed flow reports
    /// [`FlowError::Cancelled`].
    pub async fn admit_via(
        &self,
        flow: &QueueFlow,
        show_id: &ShowId,
        caller_id: &CallerId,
        caller_info: Option<CallerInfo>,
    ) -> Result<Admission, FlowError> {
        flow.start(show_id.clone(), caller_id.clone(), caller_info)
            .await
            .map_err(|_| FlowError::Cancelled)?;
        flow.wait_for_outcome(self.outcome_timeout)
            .await
            .map(Admission::from)
    }

    /// Give up admission for a show
    ///
    /// Clears the stored grant and tells the queue service, best-effort.
    pub async fn release(&self, show_id: &ShowId, caller_id: &CallerId) {
        if let Err(error) = self.env.grants().clear(show_id) {
            tracing::warn!(%show_id, %error, "Failed to clear stored grant");
        }
        if let Err(error) = self.env.queue().leave(show_id, caller_id).await {
            tracing::debug!(%show_id, %error, "Best-effort leave failed");
        }
        tracing::info!(%show_id, %caller_id, "Admission released");
    }
}
