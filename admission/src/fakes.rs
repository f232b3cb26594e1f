//! Scripted service doubles for development and testing.
//!
//! Each operation replays a scripted list of responses in order and then
//! keeps repeating the last one. Every call is counted, so tests can assert
//! properties such as "no position poll after leave".

use crate::client::wire::Operation;
use crate::client::{NewHold, QueueService, ReservationService};
use crate::error::{QueueError, ReservationError};
use crate::types::{
    AccessGrant, CallerId, CallerInfo, Hold, JoinOutcome, PollOutcome, QueueStatus, Seat, ShowId,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Responses for one operation
#[derive(Debug)]
struct Script<T> {
    pending: Mutex<VecDeque<Result<T, QueueError>>>,
    last: Mutex<Option<Result<T, QueueError>>>,
    calls: AtomicUsize,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> Script<T> {
    fn push(&self, response: Result<T, QueueError>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    fn next(&self, operation: Operation) -> Result<T, QueueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(response) = next {
            *last = Some(response);
        }
        last.clone().unwrap_or_else(|| {
            Err(QueueError::TransientServer {
                status: 503,
                message: format!("no scripted response for {}", operation.as_str()),
            })
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Scripted [`QueueService`].
///
/// ```
/// use admission::fakes::ScriptedQueueService;
/// use admission::types::QueueStatus;
///
/// let queue = ScriptedQueueService::new()
///     .with_status(Ok(QueueStatus { is_open: true, queue_size: 3 }));
/// ```
#[derive(Debug, Default)]
pub struct ScriptedQueueService {
    status: Script<QueueStatus>,
    join: Script<JoinOutcome>,
    position: Script<PollOutcome>,
    claim: Script<AccessGrant>,
    leave: Script<()>,
    latency: Mutex<Duration>,
}

impl ScriptedQueueService {
    /// A service with nothing scripted; `leave` succeeds, everything else
    /// answers 503 until scripted
    #[must_use]
    pub fn new() -> Self {
        let service = Self::default();
        *service.leave.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Ok(()));
        service
    }

    /// Queue a `status` response
    #[must_use]
    pub fn with_status(self, response: Result<QueueStatus, QueueError>) -> Self {
        self.status.push(response);
        self
    }

    /// Queue a `join` response
    #[must_use]
    pub fn with_join(self, response: Result<JoinOutcome, QueueError>) -> Self {
        self.join.push(response);
        self
    }

    /// Queue `position` responses, in order
    #[must_use]
    pub fn with_positions(
        self,
        responses: impl IntoIterator<Item = Result<PollOutcome, QueueError>>,
    ) -> Self {
        for response in responses {
            self.position.push(response);
        }
        self
    }

    /// Queue a `claim-access` response
    #[must_use]
    pub fn with_claim(self, response: Result<AccessGrant, QueueError>) -> Self {
        self.claim.push(response);
        self
    }

    /// Queue a `leave` response
    #[must_use]
    pub fn with_leave(self, response: Result<(), QueueError>) -> Self {
        self.leave.push(response);
        self
    }

    /// Delay every response by `latency`
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
        self
    }

    /// Number of calls made to `operation`
    #[must_use]
    pub fn calls(&self, operation: Operation) -> usize {
        match operation {
            Operation::Status => self.status.calls(),
            Operation::Join => self.join.calls(),
            Operation::Position => self.position.calls(),
            Operation::Claim => self.claim.calls(),
            Operation::Leave => self.leave.calls(),
        }
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl QueueService for ScriptedQueueService {
    async fn status(&self, _show_id: &ShowId) -> Result<QueueStatus, QueueError> {
        let response = self.status.next(Operation::Status);
        self.delay().await;
        response
    }

    async fn join(
        &self,
        _show_id: &ShowId,
        _caller_id: &CallerId,
        _caller_info: Option<&CallerInfo>,
    ) -> Result<JoinOutcome, QueueError> {
        let response = self.join.next(Operation::Join);
        self.delay().await;
        response
    }

    async fn position(
        &self,
        _show_id: &ShowId,
        _caller_id: &CallerId,
    ) -> Result<PollOutcome, QueueError> {
        let response = self.position.next(Operation::Position);
        self.delay().await;
        response
    }

    async fn claim_access(
        &self,
        _show_id: &ShowId,
        _caller_id: &CallerId,
    ) -> Result<AccessGrant, QueueError> {
        let response = self.claim.next(Operation::Claim);
        self.delay().await;
        response
    }

    async fn leave(&self, _show_id: &ShowId, _caller_id: &CallerId) -> Result<(), QueueError> {
        let response = self.leave.next(Operation::Leave);
        self.delay().await;
        response
    }
}

/// Scripted [`ReservationService`] that records submitted holds.
#[derive(Debug, Default)]
pub struct ScriptedReservationService {
    availability: Mutex<VecDeque<Result<Vec<Seat>, ReservationError>>>,
    holds: Mutex<VecDeque<Result<Hold, ReservationError>>>,
    submitted: Mutex<Vec<NewHold>>,
    availability_calls: AtomicUsize,
}

impl ScriptedReservationService {
    /// A service with nothing scripted
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an availability response; the last one repeats
    #[must_use]
    pub fn with_availability(self, response: Result<Vec<Seat>, ReservationError>) -> Self {
        self.availability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
        self
    }

    /// Queue a hold response
    #[must_use]
    pub fn with_hold(self, response: Result<Hold, ReservationError>) -> Self {
        self.holds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
        self
    }

    /// Holds submitted so far
    #[must_use]
    pub fn submitted(&self) -> Vec<NewHold> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of availability fetches
    #[must_use]
    pub fn availability_calls(&self) -> usize {
        self.availability_calls.load(Ordering::SeqCst)
    }

    /// Number of hold submissions
    #[must_use]
    pub fn hold_calls(&self) -> usize {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ReservationService for ScriptedReservationService {
    async fn available_seats(&self, _show_id: &ShowId) -> Result<Vec<Seat>, ReservationError> {
        self.availability_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self
            .availability
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match script.len() {
            0 => Ok(Vec::new()),
            1 => script.front().cloned().unwrap_or_else(|| Ok(Vec::new())),
            _ => script.pop_front().unwrap_or_else(|| Ok(Vec::new())),
        }
    }

    async fn create_hold(&self, hold: &NewHold) -> Result<Hold, ReservationError> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hold.clone());
        self.holds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(ReservationError::TransientServer {
                    status: 503,
                    message: "no scripted hold response".to_string(),
                })
            })
    }
}
