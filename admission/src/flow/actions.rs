//! Actions for the queue flow.

use crate::error::QueueError;
use crate::types::{
    AccessGrant, CallerId, CallerInfo, JoinOutcome, PollOutcome, QueueStatus, ShowId,
};

/// Inputs to the queue flow reducer.
///
/// `StartFlow` and `Leave` come from the caller. Everything else is produced
/// by the flow's own effects and carries the `generation` it was issued in,
/// so results that arrive after a leave or restart are recognised as stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueAction {
    /// Begin admission for a show
    StartFlow {
        /// Show to queue for
        show_id: ShowId,
        /// Caller queueing
        caller_id: CallerId,
        /// Optional details sent with `join`
        caller_info: Option<CallerInfo>,
    },

    /// Queue status arrived
    StatusChecked {
        /// Issuing generation
        generation: u64,
        /// Status or classified failure
        result: Result<QueueStatus, QueueError>,
    },

    /// `join` (or leave-and-rejoin) finished
    Joined {
        /// Issuing generation
        generation: u64,
        /// Outcome or classified failure
        result: Result<JoinOutcome, QueueError>,
    },

    /// Backoff after a failed join elapsed
    RetryJoin {
        /// Issuing generation
        generation: u64,
    },

    /// Poll timer fired
    PollTick {
        /// Issuing generation
        generation: u64,
    },

    /// Position poll finished
    PositionPolled {
        /// Issuing generation
        generation: u64,
        /// Sequence number of the poll
        seq: u64,
        /// Outcome or classified failure
        result: Result<PollOutcome, QueueError>,
    },

    /// `claim-access` finished
    AccessClaimed {
        /// Issuing generation
        generation: u64,
        /// Grant or classified failure
        result: Result<AccessGrant, QueueError>,
    },

    /// Leave the queue (teardown, navigation, explicit cancel)
    Leave,
}

impl QueueAction {
    /// Generation an effect result belongs to; `None` for caller commands
    #[must_use]
    pub const fn generation(&self) -> Option<u64> {
        match self {
            Self::StatusChecked { generation, .. }
            | Self::Joined { generation, .. }
            | Self::RetryJoin { generation }
            | Self::PollTick { generation }
            | Self::PositionPolled { generation, .. }
            | Self::AccessClaimed { generation, .. } => Some(*generation),
            Self::StartFlow { .. } | Self::Leave => None,
        }
    }

    /// Log label
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartFlow { .. } => "start_flow",
            Self::StatusChecked { .. } => "status_checked",
            Self::Joined { .. } => "joined",
            Self::RetryJoin { .. } => "retry_join",
            Self::PollTick { .. } => "poll_tick",
            Self::PositionPolled { .. } => "position_polled",
            Self::AccessClaimed { .. } => "access_claimed",
            Self::Leave => "leave",
        }
    }
}
