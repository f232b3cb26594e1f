//! Hold orchestration: turns a seat selection plus admission into a hold.
//!
//! Validation that the client can do on its own (quantity limit, grant
//! presence, expiry and prior use) happens before any network call. The
//! availability snapshot is always fetched fresh, and a seat conflict is
//! surfaced to the caller together with a refreshed snapshot. It is never
//! retried automatically.

use crate::client::{NewHold, ReservationService};
use crate::error::{HoldError, ReservationError};
use crate::gate::Admission;
use crate::grants::GrantStore;
use crate::types::{
    AccessGrant, AccessToken, AvailabilitySnapshot, Customer, Hold, Seat, SeatId, SeatSelection,
    SectionId, ShowId, UnavailableSeat,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use turnstile_core::environment::Clock;
use turnstile_runtime::retry::{RetryPolicy, retry_with_predicate};

/// Platform default for seats per caller per event
pub const DEFAULT_MAX_TICKETS_PER_EVENT: u32 = 5;

/// What the caller wants to hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoldRequest {
    /// Show to hold seats for
    pub show_id: ShowId,
    /// Seats per section
    pub selection: SeatSelection,
    /// Buyer details sent with the hold
    pub customer: Customer,
}

/// Creates holds on the reservation service.
pub struct HoldOrchestrator {
    reservations: Arc<dyn ReservationService>,
    grants: Arc<dyn GrantStore>,
    clock: Arc<dyn Clock>,
    max_tickets_per_event: u32,
    availability_retry: RetryPolicy,
    /// Spent tokens, kept until they expire
    consumed: Mutex<HashMap<AccessToken, DateTime<Utc>>>,
}

impl HoldOrchestrator {
    /// Create an orchestrator with the default per-event limit
    #[must_use]
    pub fn new(
        reservations: Arc<dyn ReservationService>,
        grants: Arc<dyn GrantStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reservations,
            grants,
            clock,
            max_tickets_per_event: DEFAULT_MAX_TICKETS_PER_EVENT,
            availability_retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(250))
                .max_delay(Duration::from_secs(2))
                .build(),
            consumed: Mutex::new(HashMap::new()),
        }
    }

    /// Override the per-event seat limit
    #[must_use]
    pub const fn with_max_tickets(mut self, limit: u32) -> Self {
        self.max_tickets_per_event = limit;
        self
    }

    /// Override the retry policy for availability reads
    #[must_use]
    pub fn with_availability_retry(mut self, policy: RetryPolicy) -> Self {
        self.availability_retry = policy;
        self
    }

    /// Hold seats for `request`
    ///
    /// `admission` is what the [`AdmissionGate`](crate::gate::AdmissionGate)
    /// returned for this show. A bypass sends the hold without a token; a
    /// grant is checked locally and attached.
    ///
    /// On success a queue grant is spent: it is cleared from storage and
    /// refused if offered again.
    ///
    /// # Errors
    ///
    /// - [`HoldError::EmptySelection`] / [`HoldError::QuantityLimitExceeded`]
    ///   before any network call
    /// - [`HoldError::AdmissionRequired`], [`HoldError::GrantExpired`],
    ///   [`HoldError::GrantAlreadyUsed`], [`HoldError::GrantShowMismatch`]
    ///   before any network call
    /// - [`HoldError::InsufficientSeats`] if a section cannot cover the request
    /// - [`HoldError::SeatConflict`] if another buyer got there first
    /// - [`HoldError::HoldAlreadyExists`] if the caller should resume a hold
    /// - transport failures from the reservation service
    pub async fn create_hold(
        &self,
        request: &HoldRequest,
        admission: Option<&Admission>,
    ) -> Result<Hold, HoldError> {
        let requested = self.validate_quantity(&request.selection)?;
        let grant = self.check_admission(&request.show_id, admission)?;

        let snapshot = self.fetch_availability(&request.show_id).await?;
        let seat_ids = select_seats(&snapshot, &request.selection)?;
        tracing::debug!(
            show_id = %request.show_id,
            requested,
            seats = ?seat_ids,
            "Seats selected"
        );

        let hold = NewHold {
            show_id: request.show_id.clone(),
            seat_ids,
            customer: request.customer.clone(),
            access_token: grant.map(|g| g.access_token.clone()),
        };

        match self.reservations.create_hold(&hold).await {
            Ok(created) => {
                if let Some(grant) = grant {
                    self.spend(grant);
                }
                tracing::info!(
                    show_id = %request.show_id,
                    hold_id = %created.hold_id,
                    expires_at = %created.expires_at,
                    "Hold created"
                );
                Ok(created)
            },
            Err(ReservationError::SeatsUnavailable(unavailable)) => {
                tracing::warn!(
                    show_id = %request.show_id,
                    conflicts = unavailable.len(),
                    "Seats taken by another buyer"
                );
                let refreshed = match self.reservations.available_seats(&request.show_id).await {
                    Ok(seats) => Some(AvailabilitySnapshot {
                        show_id: request.show_id.clone(),
                        seats: without_taken(seats, &hold.seat_ids, &unavailable),
                        fetched_at: self.clock.now(),
                    }),
                    Err(error) => {
                        tracing::debug!(%error, "Refetch after seat conflict failed");
                        None
                    },
                };
                Err(HoldError::SeatConflict {
                    unavailable,
                    refreshed,
                })
            },
            Err(ReservationError::AccessRejected) => {
                tracing::warn!(show_id = %request.show_id, "Reservation service rejected the access grant");
                self.forget_grant(&request.show_id);
                Err(HoldError::AdmissionRequired)
            },
            Err(error) => Err(error.into()),
        }
    }

    fn validate_quantity(&self, selection: &SeatSelection) -> Result<u64, HoldError> {
        let requested = selection.total_quantity();
        if requested == 0 {
            return Err(HoldError::EmptySelection);
        }
        if requested > u64::from(self.max_tickets_per_event) {
            return Err(HoldError::QuantityLimitExceeded {
                requested,
                limit: self.max_tickets_per_event,
            });
        }
        Ok(requested)
    }

    fn check_admission<'a>(
        &self,
        show_id: &ShowId,
        admission: Option<&'a Admission>,
    ) -> Result<Option<&'a AccessGrant>, HoldError> {
        let grant = match admission {
            None => return Err(HoldError::AdmissionRequired),
            Some(Admission::Bypassed { .. }) => return Ok(None),
            Some(Admission::Granted(grant)) => grant,
        };

        if &grant.show_id != show_id {
            return Err(HoldError::GrantShowMismatch);
        }
        let now = self.clock.now();
        {
            let mut consumed = self.consumed.lock().unwrap_or_else(PoisonError::into_inner);
            consumed.retain(|_, expires_at| *expires_at > now);
            if consumed.contains_key(&grant.access_token) {
                return Err(HoldError::GrantAlreadyUsed);
            }
        }
        if !grant.is_valid_at(now) {
            self.forget_grant(show_id);
            return Err(HoldError::GrantExpired {
                expired_at: grant.expires_at,
            });
        }
        Ok(Some(grant))
    }

    async fn fetch_availability(&self, show_id: &ShowId) -> Result<AvailabilitySnapshot, HoldError> {
        let seats = retry_with_predicate(
            self.availability_retry.clone(),
            || self.reservations.available_seats(show_id),
            ReservationError::is_transient,
        )
        .await?;
        Ok(AvailabilitySnapshot {
            show_id: show_id.clone(),
            seats,
            fetched_at: self.clock.now(),
        })
    }

    fn spend(&self, grant: &AccessGrant) {
        self.consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(grant.access_token.clone(), grant.expires_at);
        self.forget_grant(&grant.show_id);
    }

    fn forget_grant(&self, show_id: &ShowId) {
        if let Err(error) = self.grants.clear(show_id) {
            tracing::warn!(%show_id, %error, "Failed to clear stored grant");
        }
    }
}

/// Drop the seats a conflict reported as taken
///
/// The server names a taken seat by id or only by number. A number is
/// matched against the seats just submitted, so same-numbered seats in
/// other rows stay available.
fn without_taken(seats: Vec<Seat>, submitted: &[SeatId], unavailable: &[UnavailableSeat]) -> Vec<Seat> {
    let taken_ids: HashSet<&SeatId> = unavailable.iter().filter_map(|u| u.seat_id.as_ref()).collect();
    let taken_numbers: HashSet<u32> = unavailable.iter().filter_map(|u| u.seat_number).collect();

    seats
        .into_iter()
        .filter(|seat| {
            let by_id = taken_ids.contains(&seat.seat_id);
            let by_number =
                taken_numbers.contains(&seat.number) && submitted.contains(&seat.seat_id);
            !(by_id || by_number)
        })
        .collect()
}

/// Pick the best available seats for every requested section
///
/// Sections requested more than once are merged. Within a section seats are
/// taken best first (see [`Seat::best_first`](crate::types::Seat::best_first)),
/// so the same snapshot and selection always give the same seats.
///
/// # Errors
///
/// [`HoldError::InsufficientSeats`] if a section has fewer seats than requested.
pub fn select_seats(
    snapshot: &AvailabilitySnapshot,
    selection: &SeatSelection,
) -> Result<Vec<SeatId>, HoldError> {
    let mut wanted: Vec<(&SectionId, u32)> = Vec::new();
    for request in &selection.sections {
        if request.quantity == 0 {
            continue;
        }
        match wanted.iter_mut().find(|(section, _)| *section == &request.section_id) {
            Some((_, quantity)) => *quantity = quantity.saturating_add(request.quantity),
            None => wanted.push((&request.section_id, request.quantity)),
        }
    }

    let mut chosen = Vec::new();
    for (section_id, quantity) in wanted {
        let available = snapshot.best_in_section(section_id);
        let needed = usize::try_from(quantity).unwrap_or(usize::MAX);
        if available.len() < needed {
            return Err(HoldError::InsufficientSeats {
                section_id: section_id.clone(),
                requested: quantity,
                available: available.len(),
            });
        }
        chosen.extend(available.into_iter().take(needed).map(|seat| seat.seat_id.clone()));
    }
    Ok(chosen)
}
