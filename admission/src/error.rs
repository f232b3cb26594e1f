//! Error taxonomy.
//!
//! Transport failures are classified once, at the client boundary, into
//! [`QueueError`] or [`ReservationError`]. The queue flow and the hold
//! orchestrator branch only on these kinds and surface [`FlowError`] /
//! [`HoldError`] to callers, each carrying a concrete [`NextAction`].

use crate::types::{AvailabilitySnapshot, HoldId, SectionId, UnavailableSeat};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// What the caller should do after a user-visible failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NextAction {
    /// Try the same operation again
    Retry,
    /// Wait a little, then try again
    Wait,
    /// Pick different seats
    Reselect,
    /// Go back through the queue
    Rejoin,
    /// Continue with the hold that already exists
    ResumeHold,
    /// Ask for help; retrying will not fix it
    ContactSupport,
    /// Ask for fewer seats
    ReduceQuantity,
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hint = match self {
            Self::Retry => "please try again",
            Self::Wait => "please wait a moment and try again",
            Self::Reselect => "please choose different seats",
            Self::Rejoin => "please rejoin the queue",
            Self::ResumeHold => "continue with your existing hold",
            Self::ContactSupport => "please contact support",
            Self::ReduceQuantity => "please select fewer tickets",
        };
        f.write_str(hint)
    }
}

/// Classified failure of an admission-control request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QueueError {
    /// `join` conflicted: the caller is already a member
    #[error("caller is already in the queue")]
    AlreadyQueued,

    /// The server no longer recognises the caller's membership
    #[error("queue membership no longer exists")]
    MembershipEvicted,

    /// `claim-access` lost a race or it is not the caller's turn yet
    #[error("access could not be claimed")]
    ClaimRace,

    /// Too many requests
    #[error("rate limited")]
    RateLimited {
        /// Server-suggested wait from `Retry-After`
        retry_after: Option<Duration>,
    },

    /// The caller is not allowed to use the queue
    #[error("forbidden")]
    Forbidden,

    /// Server-side failure
    #[error("server error (status {status}): {message}")]
    TransientServer {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Connection, timeout or other transport failure
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// Response body could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl QueueError {
    /// Whether the failure is worth retrying unchanged
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientServer { .. } | Self::TransientNetwork(_) | Self::InvalidResponse(_)
        )
    }

    /// Short label for metrics and logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyQueued => "already_queued",
            Self::MembershipEvicted => "evicted",
            Self::ClaimRace => "claim_race",
            Self::RateLimited { .. } => "rate_limited",
            Self::Forbidden => "forbidden",
            Self::TransientServer { .. } => "server_error",
            Self::TransientNetwork(_) => "network_error",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Terminal failure of a queue flow.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FlowError {
    /// `join` kept conflicting after a leave-and-rejoin
    #[error("you already appear to be in the queue for this show")]
    StuckMembership,

    /// The queue could not be joined or kept
    #[error("the queue is unavailable: {reason}")]
    QueueUnavailable {
        /// What gave up
        reason: String,
    },

    /// The admission service refused the caller
    #[error("you are not allowed to join this queue")]
    Forbidden,

    /// The flow was left before it reached an outcome
    #[error("you left the queue")]
    Cancelled,
}

impl FlowError {
    /// What the caller should do next
    #[must_use]
    pub const fn next_action(&self) -> NextAction {
        match self {
            Self::StuckMembership | Self::Forbidden => NextAction::ContactSupport,
            Self::QueueUnavailable { .. } => NextAction::Retry,
            Self::Cancelled => NextAction::Rejoin,
        }
    }
}

/// Classified failure of a reservation-service request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReservationError {
    /// 409 `SEATS_UNAVAILABLE`
    #[error("seats unavailable")]
    SeatsUnavailable(Vec<UnavailableSeat>),

    /// 409 `HOLD_EXISTS`
    #[error("hold already exists")]
    HoldExists(Option<HoldId>),

    /// The access token was refused
    #[error("access token rejected")]
    AccessRejected,

    /// Too many requests
    #[error("rate limited")]
    RateLimited {
        /// Server-suggested wait from `Retry-After`
        retry_after: Option<Duration>,
    },

    /// Authentication failure
    #[error("forbidden")]
    Forbidden,

    /// Server-side failure
    #[error("server error (status {status}): {message}")]
    TransientServer {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Connection, timeout or other transport failure
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// Response body could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ReservationError {
    /// Whether an idempotent read may be retried after this failure
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientServer { .. } | Self::TransientNetwork(_))
    }
}

/// Failure to create a hold.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HoldError {
    /// No seats were requested
    #[error("no seats selected")]
    EmptySelection,

    /// More seats requested than the per-event limit allows
    #[error("{requested} tickets requested but at most {limit} are allowed per event")]
    QuantityLimitExceeded {
        /// Total requested
        requested: u64,
        /// Per-event limit
        limit: u32,
    },

    /// Not enough seats left in a section
    #[error("only {available} seats left in section {section_id}, {requested} requested")]
    InsufficientSeats {
        /// Section short of seats
        section_id: SectionId,
        /// Seats requested there
        requested: u32,
        /// Seats available there
        available: usize,
    },

    /// The queue is active and the caller holds no grant
    #[error("admission through the queue is required")]
    AdmissionRequired,

    /// The caller's grant has lapsed
    #[error("your access expired at {expired_at}")]
    GrantExpired {
        /// When it lapsed
        expired_at: DateTime<Utc>,
    },

    /// The grant was already used for a hold
    #[error("your access has already been used")]
    GrantAlreadyUsed,

    /// The grant belongs to another show
    #[error("your access is for a different show")]
    GrantShowMismatch,

    /// Another buyer took some of the selected seats
    #[error("seats no longer available: {}", list_seats(.unavailable))]
    SeatConflict {
        /// Seats that could not be held
        unavailable: Vec<UnavailableSeat>,
        /// Availability fetched after the conflict, if the refetch succeeded
        refreshed: Option<AvailabilitySnapshot>,
    },

    /// The caller already has an active hold for the show
    #[error("an active hold already exists")]
    HoldAlreadyExists {
        /// The existing hold, when reported
        hold_id: Option<HoldId>,
    },

    /// Too many requests
    #[error("too many requests")]
    RateLimited {
        /// Server-suggested wait
        retry_after: Option<Duration>,
    },

    /// Authentication failure
    #[error("forbidden")]
    Forbidden,

    /// Server-side failure
    #[error("reservation service error (status {status}): {message}")]
    TransientServer {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Connection, timeout or other transport failure
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// Response body could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

fn list_seats(seats: &[UnavailableSeat]) -> String {
    if seats.is_empty() {
        return "one or more selected seats".to_string();
    }
    seats
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl HoldError {
    /// What the caller should do next
    #[must_use]
    pub const fn next_action(&self) -> NextAction {
        match self {
            Self::EmptySelection | Self::InsufficientSeats { .. } | Self::SeatConflict { .. } => {
                NextAction::Reselect
            },
            Self::QuantityLimitExceeded { .. } => NextAction::ReduceQuantity,
            Self::AdmissionRequired
            | Self::GrantExpired { .. }
            | Self::GrantAlreadyUsed
            | Self::GrantShowMismatch => NextAction::Rejoin,
            Self::HoldAlreadyExists { .. } => NextAction::ResumeHold,
            Self::RateLimited { .. } => NextAction::Wait,
            Self::Forbidden => NextAction::ContactSupport,
            Self::TransientServer { .. } | Self::TransientNetwork(_) | Self::InvalidResponse(_) => {
                NextAction::Retry
            },
        }
    }

    /// Short label for metrics and logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EmptySelection => "empty_selection",
            Self::QuantityLimitExceeded { .. } => "quantity_limit",
            Self::InsufficientSeats { .. } => "insufficient_seats",
            Self::AdmissionRequired => "admission_required",
            Self::GrantExpired { .. } => "grant_expired",
            Self::GrantAlreadyUsed => "grant_used",
            Self::GrantShowMismatch => "grant_mismatch",
            Self::SeatConflict { .. } => "seat_conflict",
            Self::HoldAlreadyExists { .. } => "hold_exists",
            Self::RateLimited { .. } => "rate_limited",
            Self::Forbidden => "forbidden",
            Self::TransientServer { .. } => "server_error",
            Self::TransientNetwork(_) => "network_error",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<ReservationError> for HoldError {
    fn from(error: ReservationError) -> Self {
        match error {
            ReservationError::SeatsUnavailable(unavailable) => Self::SeatConflict {
                unavailable,
                refreshed: None,
            },
            ReservationError::HoldExists(hold_id) => Self::HoldAlreadyExists { hold_id },
            ReservationError::AccessRejected => Self::AdmissionRequired,
            ReservationError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            ReservationError::Forbidden => Self::Forbidden,
            ReservationError::TransientServer { status, message } => {
                Self::TransientServer { status, message }
            },
            ReservationError::TransientNetwork(message) => Self::TransientNetwork(message),
            ReservationError::InvalidResponse(message) => Self::InvalidResponse(message),
        }
    }
}

/// Failure to read or write persisted grants
#[derive(Debug, Error)]
pub enum GrantStoreError {
    /// Reading or writing the backing file failed
    #[error("grant store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not valid grant JSON
    #[error("grant store is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}
