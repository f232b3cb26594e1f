//! Domain types for queue admission and seat holds.
//!
//! Everything here is a plain value: identifiers, the queue snapshots returned
//! by the admission-control service, the access grant that lets a caller past
//! the queue, and the seat/hold types used by the reservation service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier string
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a show (one performance with its own queue and seat map)
    ShowId
);
string_id!(
    /// Verified identity of the caller, resolved before any of this code runs
    CallerId
);
string_id!(
    /// Server-side queue session created by `join`
    SessionId
);
string_id!(
    /// Identifier of a seating section
    SectionId
);
string_id!(
    /// Identifier of a single seat
    SeatId
);
string_id!(
    /// Identifier of a hold returned by the reservation service
    HoldId
);

// ============================================================================
// Queue
// ============================================================================

/// Per-show queue snapshot. Fetched on demand, never owned by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Whether admission control is active for the show
    pub is_open: bool,
    /// Number of callers currently waiting
    pub queue_size: u32,
}

/// Where a caller stands in the queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePosition {
    /// 1-based position; 1 means it is the caller's turn
    pub position: u32,
    /// Number of callers currently waiting
    pub queue_size: u32,
    /// Server estimate of the remaining wait
    pub estimated_wait_seconds: u64,
}

/// One caller's presence in a show's queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMembership {
    /// Show being queued for
    pub show_id: ShowId,
    /// Caller holding the membership
    pub caller_id: CallerId,
    /// Latest known position
    pub position: QueuePosition,
    /// Server session created by `join`
    pub session_id: SessionId,
}

impl QueueMembership {
    /// Apply a newer position reported by a poll
    pub const fn update(&mut self, position: QueuePosition) {
        self.position = position;
    }

    /// Whether the caller has reached the front of the queue
    #[must_use]
    pub const fn at_front(&self) -> bool {
        self.position.position <= 1
    }
}

/// Optional caller details sent along with `join`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerInfo {
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Contact email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Opaque capability token.
///
/// The token is a bearer credential, so `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a token string
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for attaching to requests
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Proof that a caller may bypass the queue and attempt a hold for one show.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    /// Show the grant is valid for
    pub show_id: ShowId,
    /// Token to present to the reservation service
    pub access_token: AccessToken,
    /// Instant after which the grant is void
    pub expires_at: DateTime<Utc>,
}

impl AccessGrant {
    /// Whether the grant may still be presented at `now`
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Result of `join`, resolved once at the client boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The caller is waiting in line
    Queued(QueueMembership),
    /// The caller landed at the front and was handed a grant immediately
    Granted(AccessGrant),
}

/// Result of a position poll, resolved once at the client boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Still waiting; position may be 1 without a token yet
    Waiting(QueuePosition),
    /// The server attached a grant to the poll response
    Granted(AccessGrant),
}

// ============================================================================
// Seats and holds
// ============================================================================

/// Contact details the hold is created for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Email address
    pub email: String,
    /// Full name
    pub name: String,
}

/// Request for `quantity` seats in one section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRequest {
    /// Section to pick seats from
    pub section_id: SectionId,
    /// Number of seats wanted
    pub quantity: u32,
}

/// Caller-chosen section/quantity pairs for one show.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSelection {
    /// Requested sections, in the caller's order
    pub sections: Vec<SectionRequest>,
}

impl SeatSelection {
    /// Build a selection from `(section, quantity)` pairs
    #[must_use]
    pub fn new(sections: impl IntoIterator<Item = (SectionId, u32)>) -> Self {
        Self {
            sections: sections
                .into_iter()
                .map(|(section_id, quantity)| SectionRequest { section_id, quantity })
                .collect(),
        }
    }

    /// Total seats requested across all sections
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.sections.iter().map(|s| u64::from(s.quantity)).sum()
    }
}

/// An available seat in the live snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    /// Seat identifier
    pub seat_id: SeatId,
    /// Section the seat belongs to
    pub section_id: SectionId,
    /// Row label ("A", "12", ...)
    pub row: String,
    /// Seat number within the row
    pub number: u32,
}

impl Seat {
    /// "Best seats first" ordering: row, then seat number, ascending.
    ///
    /// Numeric rows sort numerically and before named rows; the seat id
    /// breaks any remaining tie so the order is total.
    #[must_use]
    pub fn best_first(a: &Self, b: &Self) -> Ordering {
        row_key(&a.row)
            .cmp(&row_key(&b.row))
            .then(a.number.cmp(&b.number))
            .then_with(|| a.seat_id.cmp(&b.seat_id))
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum RowKey<'a> {
    Numeric(u64),
    Named(&'a str),
}

fn row_key(row: &str) -> RowKey<'_> {
    row.trim()
        .parse::<u64>()
        .map_or_else(|_| RowKey::Named(row.trim()), RowKey::Numeric)
}

/// Seats available for a show at `fetched_at`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvailabilitySnapshot {
    /// Show the snapshot belongs to
    pub show_id: ShowId,
    /// Available seats, unordered
    pub seats: Vec<Seat>,
    /// When the snapshot was taken
    pub fetched_at: DateTime<Utc>,
}

impl AvailabilitySnapshot {
    /// Available seats in `section`, best first
    #[must_use]
    pub fn best_in_section(&self, section: &SectionId) -> Vec<&Seat> {
        let mut seats: Vec<&Seat> = self
            .seats
            .iter()
            .filter(|seat| &seat.section_id == section)
            .collect();
        seats.sort_by(|a, b| Seat::best_first(a, b));
        seats
    }
}

/// Why a seat could not be held
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnavailableReason {
    /// Already purchased
    Sold,
    /// Held by another caller
    Held,
    /// Reason not reported
    #[serde(other)]
    Unknown,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sold => f.write_str("sold"),
            Self::Held => f.write_str("held by another customer"),
            Self::Unknown => f.write_str("unavailable"),
        }
    }
}

/// One seat named in a hold conflict
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnavailableSeat {
    /// Seat identifier, when reported
    #[serde(default)]
    pub seat_id: Option<SeatId>,
    /// Human-facing seat number, when reported
    #[serde(default)]
    pub seat_number: Option<u32>,
    /// Why the seat is unavailable
    #[serde(default = "unknown_reason")]
    pub reason: UnavailableReason,
}

const fn unknown_reason() -> UnavailableReason {
    UnavailableReason::Unknown
}

impl fmt::Display for UnavailableSeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.seat_number, &self.seat_id) {
            (Some(number), _) => write!(f, "seat {number} ({})", self.reason),
            (None, Some(id)) => write!(f, "seat {id} ({})", self.reason),
            (None, None) => write!(f, "a seat ({})", self.reason),
        }
    }
}

/// A time-limited, exclusive reservation of specific seats
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    /// Hold identifier
    pub hold_id: HoldId,
    /// Show the seats belong to
    pub show_id: ShowId,
    /// Reserved seats, in selection order
    pub seat_ids: Vec<SeatId>,
    /// When the reservation lapses
    pub expires_at: DateTime<Utc>,
    /// Reservation lifetime granted by the server
    pub ttl_minutes: u32,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

    use super::*;

    fn seat(id: &str, row: &str, number: u32) -> Seat {
        Seat {
            seat_id: SeatId::new(id),
            section_id: SectionId::new("VIP"),
            row: row.to_string(),
            number,
        }
    }

    #[test]
    fn test_numeric_rows_sort_numerically_before_named_rows() {
        let snapshot = AvailabilitySnapshot {
            show_id: ShowId::new("S1"),
            seats: vec![
                seat("b1", "B", 1),
                seat("r10", "10", 1),
                seat("r2", "2", 5),
                seat("r2b", "2", 3),
                seat("a9", "A", 9),
            ],
            fetched_at: Utc::now(),
        };

        let order: Vec<&str> = snapshot
            .best_in_section(&SectionId::new("VIP"))
            .iter()
            .map(|s| s.seat_id.as_str())
            .collect();
        assert_eq!(order, vec!["r2b", "r2", "r10", "a9", "b1"]);
    }

    #[test]
    fn test_access_token_debug_is_redacted() {
        let grant = AccessGrant {
            show_id: ShowId::new("S1"),
            access_token: AccessToken::new("secret-token"),
            expires_at: Utc::now(),
        };
        let printed = format!("{grant:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_grant_validity_is_strict() {
        let now = Utc::now();
        let grant = AccessGrant {
            show_id: ShowId::new("S1"),
            access_token: AccessToken::new("t"),
            expires_at: now,
        };
        assert!(!grant.is_valid_at(now));
        assert!(grant.is_valid_at(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_unavailable_seat_names_the_seat() {
        let seat: UnavailableSeat =
            serde_json::from_str(r#"{"seatNumber":101,"reason":"held"}"#).unwrap();
        assert_eq!(seat.to_string(), "seat 101 (held by another customer)");

        let seat: UnavailableSeat =
            serde_json::from_str(r#"{"seatId":"x-7","reason":"reserved-elsewhere"}"#).unwrap();
        assert_eq!(seat.reason, UnavailableReason::Unknown);
        assert_eq!(seat.to_string(), "seat x-7 (unavailable)");
    }

    #[test]
    fn test_selection_total_quantity() {
        let selection = SeatSelection::new([
            (SectionId::new("A"), 2),
            (SectionId::new("B"), u32::MAX),
        ]);
        assert_eq!(selection.total_quantity(), 2 + u64::from(u32::MAX));
    }
}
