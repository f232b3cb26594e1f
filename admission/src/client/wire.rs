//! JSON shapes exchanged with the remote services, and status classification.
//!
//! Response bodies with optional `hasAccess`/`accessToken`/`expiresAt` fields
//! are resolved here, once, into [`JoinOutcome`] / [`PollOutcome`].

use crate::error::{QueueError, ReservationError};
use crate::types::{
    AccessGrant, AccessToken, CallerId, CallerInfo, HoldId, JoinOutcome, PollOutcome,
    QueueMembership, QueuePosition, Seat, SeatId, SessionId, ShowId, UnavailableSeat,
};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Admission-control operation a response belongs to.
///
/// The same status code means different things per operation (409 on `join`
/// is a duplicate member, 409 on `claim-access` is a lost race).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// `GET /queue/{show}/status`
    Status,
    /// `POST /queue/{show}/join`
    Join,
    /// `GET /queue/{show}/position`
    Position,
    /// `POST /queue/{show}/claim-access`
    Claim,
    /// `DELETE /queue/{show}/leave`
    Leave,
}

impl Operation {
    /// Metric label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Join => "join",
            Self::Position => "position",
            Self::Claim => "claim",
            Self::Leave => "leave",
        }
    }
}

/// Map a non-success status to the queue error taxonomy.
#[must_use]
pub fn classify_queue_status(
    operation: Operation,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> QueueError {
    match (operation, status) {
        (Operation::Join, StatusCode::CONFLICT) => QueueError::AlreadyQueued,
        (Operation::Position, StatusCode::NOT_FOUND | StatusCode::CONFLICT) => {
            QueueError::MembershipEvicted
        },
        (Operation::Claim, StatusCode::CONFLICT | StatusCode::LOCKED) => QueueError::ClaimRace,
        (_, StatusCode::TOO_MANY_REQUESTS) => QueueError::RateLimited { retry_after },
        (_, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => QueueError::Forbidden,
        (_, status) => QueueError::TransientServer {
            status: status.as_u16(),
            message: body,
        },
    }
}

/// `Retry-After` in delta-seconds form
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a transport failure (connect, timeout, body read) to a network error
#[must_use]
pub fn transport_error(error: &reqwest::Error) -> QueueError {
    QueueError::TransientNetwork(error.to_string())
}

// ============================================================================
// Admission control
// ============================================================================

/// `POST /queue/{show}/join` body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest<'a> {
    /// Caller joining
    pub caller_id: &'a CallerId,
    /// Optional caller details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_info: Option<&'a CallerInfo>,
}

/// Body of `claim-access` and `leave`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerRequest<'a> {
    /// Caller the request is for
    pub caller_id: &'a CallerId,
}

/// `join` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    /// Position after joining
    pub position: u32,
    /// Queue size after joining
    pub queue_size: u32,
    /// Server wait estimate
    #[serde(default)]
    pub estimated_wait_seconds: u64,
    /// New session
    pub session_id: SessionId,
    /// Set when the caller was admitted immediately
    #[serde(default)]
    pub has_access: Option<bool>,
    /// Token when admitted immediately
    #[serde(default)]
    pub access_token: Option<String>,
    /// Token expiry when admitted immediately
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl JoinResponse {
    /// Resolve into a tagged outcome
    #[must_use]
    pub fn into_outcome(self, show_id: &ShowId, caller_id: &CallerId) -> JoinOutcome {
        let position = QueuePosition {
            position: self.position,
            queue_size: self.queue_size,
            estimated_wait_seconds: self.estimated_wait_seconds,
        };
        match grant_from(show_id, self.has_access, self.access_token, self.expires_at) {
            Some(grant) => JoinOutcome::Granted(grant),
            None => JoinOutcome::Queued(QueueMembership {
                show_id: show_id.clone(),
                caller_id: caller_id.clone(),
                position,
                session_id: self.session_id,
            }),
        }
    }
}

/// `position` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    /// Current position
    pub position: u32,
    /// Current queue size
    pub queue_size: u32,
    /// Server wait estimate
    #[serde(default)]
    pub estimated_wait_seconds: u64,
    /// Set once the caller has been admitted
    #[serde(default)]
    pub has_access: Option<bool>,
    /// Token once admitted
    #[serde(default)]
    pub access_token: Option<String>,
    /// Token expiry once admitted
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PositionResponse {
    /// Resolve into a tagged outcome
    #[must_use]
    pub fn into_outcome(self, show_id: &ShowId) -> PollOutcome {
        match grant_from(show_id, self.has_access, self.access_token, self.expires_at) {
            Some(grant) => PollOutcome::Granted(grant),
            None => PollOutcome::Waiting(QueuePosition {
                position: self.position,
                queue_size: self.queue_size,
                estimated_wait_seconds: self.estimated_wait_seconds,
            }),
        }
    }
}

/// `claim-access` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    /// Issued token
    pub access_token: String,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
}

impl ClaimResponse {
    /// Attach the show the grant is for
    #[must_use]
    pub fn into_grant(self, show_id: &ShowId) -> AccessGrant {
        AccessGrant {
            show_id: show_id.clone(),
            access_token: AccessToken::new(self.access_token),
            expires_at: self.expires_at,
        }
    }
}

/// A grant is only usable with both a token and an expiry; `hasAccess: false`
/// overrides a stray token.
fn grant_from(
    show_id: &ShowId,
    has_access: Option<bool>,
    access_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> Option<AccessGrant> {
    if has_access == Some(false) {
        return None;
    }
    match (access_token, expires_at) {
        (Some(token), Some(expires_at)) if !token.is_empty() => Some(AccessGrant {
            show_id: show_id.clone(),
            access_token: AccessToken::new(token),
            expires_at,
        }),
        _ => None,
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// `GET /shows/{show}/seats/available` response
#[derive(Debug, Deserialize)]
pub struct AvailableSeatsResponse {
    /// Seats currently free
    #[serde(default)]
    pub seats: Vec<Seat>,
}

/// `POST /holds` body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldRequest<'a> {
    /// Show the seats belong to
    pub show_id: &'a ShowId,
    /// Seats to hold
    pub seat_ids: &'a [SeatId],
    /// Customer email
    pub customer_email: &'a str,
    /// Customer name
    pub customer_name: &'a str,
    /// Access token when the queue is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<&'a str>,
}

/// `POST /holds` success response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldResponse {
    /// New hold
    pub hold_id: HoldId,
    /// Expiry
    pub expires_at: DateTime<Utc>,
    /// Lifetime in minutes
    pub ttl_minutes: u32,
}

/// `POST /holds` 409 body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldConflictBody {
    /// `SEATS_UNAVAILABLE` or `HOLD_EXISTS`
    #[serde(default)]
    pub code: Option<String>,
    /// Seats that could not be held
    #[serde(default)]
    pub unavailable_seats: Vec<UnavailableSeat>,
    /// Existing hold, for `HOLD_EXISTS`
    #[serde(default)]
    pub hold_id: Option<HoldId>,
}

impl HoldConflictBody {
    /// Interpret a conflict; anything that is not `HOLD_EXISTS` is a seat conflict
    #[must_use]
    pub fn into_error(self) -> ReservationError {
        match self.code.as_deref() {
            Some("HOLD_EXISTS") => ReservationError::HoldExists(self.hold_id),
            _ => ReservationError::SeatsUnavailable(self.unavailable_seats),
        }
    }
}

/// Map a non-success hold/availability status to the reservation taxonomy.
#[must_use]
pub fn classify_reservation_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> ReservationError {
    match status {
        StatusCode::CONFLICT => serde_json::from_str::<HoldConflictBody>(&body)
            .unwrap_or_default()
            .into_error(),
        StatusCode::TOO_MANY_REQUESTS => ReservationError::RateLimited { retry_after },
        StatusCode::FORBIDDEN => ReservationError::AccessRejected,
        StatusCode::UNAUTHORIZED => ReservationError::Forbidden,
        status => ReservationError::TransientServer {
            status: status.as_u16(),
            message: body,
        },
    }
}
