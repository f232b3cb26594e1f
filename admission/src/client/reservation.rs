//! Reservation service client: live seat availability and hold creation.

use super::wire::{self, AvailableSeatsResponse, HoldRequest, HoldResponse};
use crate::error::ReservationError;
use crate::types::{AccessToken, Customer, Hold, Seat, SeatId, ShowId};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use turnstile_runtime::metrics::{HOLD_REQUESTS, counter};

/// Hold submission
#[derive(Clone, Debug)]
pub struct NewHold {
    /// Show the seats belong to
    pub show_id: ShowId,
    /// Seats to reserve
    pub seat_ids: Vec<SeatId>,
    /// Who the hold is for
    pub customer: Customer,
    /// Grant token when the queue is active for the show
    pub access_token: Option<AccessToken>,
}

/// Seat availability and holds.
#[async_trait]
pub trait ReservationService: Send + Sync {
    /// Seats currently available for a show
    async fn available_seats(&self, show_id: &ShowId) -> Result<Vec<Seat>, ReservationError>;

    /// Reserve seats until the returned hold expires
    async fn create_hold(&self, hold: &NewHold) -> Result<Hold, ReservationError>;
}

/// HTTP/JSON implementation of [`ReservationService`]
#[derive(Clone, Debug)]
pub struct HttpReservationClient {
    client: Client,
    base_url: String,
}

impl HttpReservationClient {
    /// Create a client for `base_url` with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client around an existing `reqwest::Client`
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn execute(request: RequestBuilder) -> Result<Response, ReservationError> {
        let response = request
            .send()
            .await
            .map_err(|e| ReservationError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = wire::retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(wire::classify_reservation_status(status, retry_after, body))
    }
}

#[async_trait]
impl ReservationService for HttpReservationClient {
    async fn available_seats(&self, show_id: &ShowId) -> Result<Vec<Seat>, ReservationError> {
        let request = self
            .client
            .get(format!("{}/shows/{show_id}/seats/available", self.base_url));
        let response: AvailableSeatsResponse = Self::execute(request)
            .await?
            .json()
            .await
            .map_err(|e| ReservationError::InvalidResponse(e.to_string()))?;
        Ok(response.seats)
    }

    async fn create_hold(&self, hold: &NewHold) -> Result<Hold, ReservationError> {
        let request = self
            .client
            .post(format!("{}/holds", self.base_url))
            .json(&HoldRequest {
                show_id: &hold.show_id,
                seat_ids: &hold.seat_ids,
                customer_email: &hold.customer.email,
                customer_name: &hold.customer.name,
                access_token: hold.access_token.as_ref().map(AccessToken::expose),
            });

        let result = match Self::execute(request).await {
            Ok(response) => response
                .json::<HoldResponse>()
                .await
                .map_err(|e| ReservationError::InvalidResponse(e.to_string())),
            Err(error) => Err(error),
        };

        let outcome = match &result {
            Ok(_) => "created",
            Err(ReservationError::SeatsUnavailable(_)) => "seat_conflict",
            Err(ReservationError::HoldExists(_)) => "hold_exists",
            Err(_) => "failed",
        };
        counter!(HOLD_REQUESTS, "outcome" => outcome).increment(1);

        let response = result?;
        Ok(Hold {
            hold_id: response.hold_id,
            show_id: hold.show_id.clone(),
            seat_ids: hold.seat_ids.clone(),
            expires_at: response.expires_at,
            ttl_minutes: response.ttl_minutes,
        })
    }
}
