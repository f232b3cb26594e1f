//! State of one caller's queue flow for one show.

use crate::error::FlowError;
use crate::types::{AccessGrant, CallerId, CallerInfo, QueueMembership, ShowId};
use std::fmt;

/// Why a flow skipped the queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BypassReason {
    /// Admission control is not active for the show
    QueueClosed,
    /// Too few callers waiting for the queue to be worth joining
    BelowThreshold {
        /// Queue size at the time of the check
        queue_size: u32,
    },
    /// The status check failed; the flow fails open
    StatusUnavailable,
}

impl fmt::Display for BypassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueClosed => f.write_str("queue closed"),
            Self::BelowThreshold { queue_size } => write!(f, "only {queue_size} waiting"),
            Self::StatusUnavailable => f.write_str("queue status unavailable"),
        }
    }
}

/// Where the flow is.
///
/// ```text
/// Idle → Checking → Bypassed
///                 ↘ Joining → Waiting ⇄ Claiming → Granted
/// any → Failed;  any --leave--> Idle
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum QueuePhase {
    /// Not started, or left
    #[default]
    Idle,
    /// Fetching queue status
    Checking,
    /// Proceeding without a grant
    Bypassed(BypassReason),
    /// `join` in flight (or backing off before retrying it)
    Joining,
    /// In line, polling position
    Waiting,
    /// At the front, exchanging the turn for a grant
    Claiming,
    /// Admitted
    Granted(AccessGrant),
    /// Gave up
    Failed(FlowError),
}

impl QueuePhase {
    /// Whether the flow has reached an outcome (or was never started)
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Bypassed(_) | Self::Granted(_) | Self::Failed(_)
        )
    }

    /// Whether the caller may hold server-side queue membership in this phase
    #[must_use]
    pub const fn may_hold_membership(&self) -> bool {
        matches!(
            self,
            Self::Joining | Self::Waiting | Self::Claiming | Self::Granted(_) | Self::Failed(_)
        )
    }

    /// Log/metric label
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Bypassed(_) => "bypassed",
            Self::Joining => "joining",
            Self::Waiting => "waiting",
            Self::Claiming => "claiming",
            Self::Granted(_) => "granted",
            Self::Failed(_) => "failed",
        }
    }
}

/// Who is queueing for what
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowSession {
    /// Show being queued for
    pub show_id: ShowId,
    /// Caller queueing
    pub caller_id: CallerId,
    /// Details sent with `join`
    pub caller_info: Option<CallerInfo>,
}

/// Complete flow state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueFlowState {
    /// Current phase
    pub phase: QueuePhase,
    /// Present from `StartFlow` until `Leave`
    pub session: Option<FlowSession>,
    /// Present while the server holds a membership for the caller
    pub membership: Option<QueueMembership>,
    /// Bumped on every start and leave; results from older generations are dropped
    pub generation: u64,
    /// Sequence number of the most recently issued poll
    pub poll_seq: u64,
    /// Sequence number of the most recently applied poll result
    pub applied_seq: u64,
    /// A position poll is outstanding
    pub poll_in_flight: bool,
    /// Restarts after membership eviction
    pub rejoin_attempts: u32,
    /// The one leave-and-rejoin after a join conflict has been used
    pub conflict_retried: bool,
    /// Consecutive failed joins
    pub join_retries: u32,
    /// Consecutive rate-limited polls or claims
    pub rate_limit_strikes: u32,
    /// Grants from polls or claims that had already expired on arrival
    pub expired_grants: u32,
}

impl QueueFlowState {
    /// Fresh state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The grant, once admitted
    #[must_use]
    pub const fn grant(&self) -> Option<&AccessGrant> {
        match &self.phase {
            QueuePhase::Granted(grant) => Some(grant),
            _ => None,
        }
    }

    /// Latest known queue position
    #[must_use]
    pub fn position(&self) -> Option<u32> {
        self.membership.as_ref().map(|m| m.position.position)
    }
}

/// Successful end of a flow
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Proceed without a grant
    Bypassed(BypassReason),
    /// Proceed with this grant
    Granted(AccessGrant),
}
