//! `QueueFlow`: the handle that owns one running queue flow.

use crate::error::FlowError;
use crate::flow::{
    FlowOutcome, QueueAction, QueueEnvironment, QueueFlowState, QueuePhase, QueueReducer,
};
use crate::types::{CallerId, CallerInfo, ShowId};
use std::time::Duration;
use tokio::sync::broadcast;
use turnstile_runtime::{Store, StoreError};

type FlowStore = Store<QueueFlowState, QueueAction, QueueEnvironment, QueueReducer>;

/// One caller's queue flow.
///
/// Owns its poll timer and in-flight requests through its [`Store`]; nothing
/// outside this handle can cancel them. Dropping the handle (or calling
/// [`QueueFlow::dispose`]) aborts all of them synchronously.
pub struct QueueFlow {
    store: FlowStore,
}

impl QueueFlow {
    /// Create an idle flow
    #[must_use]
    pub fn new(environment: QueueEnvironment) -> Self {
        Self {
            store: Store::with_broadcast_capacity(
                QueueFlowState::new(),
                QueueReducer::new(),
                environment,
                64,
            ),
        }
    }

    /// Start admission for `show_id`
    ///
    /// Ignored while a flow is already in progress.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`QueueFlow::dispose`].
    pub async fn start(
        &self,
        show_id: ShowId,
        caller_id: CallerId,
        caller_info: Option<CallerInfo>,
    ) -> Result<(), StoreError> {
        self.store
            .send(QueueAction::StartFlow {
                show_id,
                caller_id,
                caller_info,
            })
            .await
    }

    /// Leave the queue
    ///
    /// Stops polling first, clears the stored grant and returns to `Idle`;
    /// the server is notified best-effort afterwards. Calling it again is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`QueueFlow::dispose`].
    pub async fn leave(&self) -> Result<(), StoreError> {
        self.store.send(QueueAction::Leave).await
    }

    /// Stop every timer and request without notifying the server
    ///
    /// Idempotent. The flow rejects further commands afterwards.
    pub fn dispose(&self) {
        self.store.shutdown();
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> QueueFlowState {
        self.store.state(Clone::clone).await
    }

    /// Current phase
    pub async fn phase(&self) -> QueuePhase {
        self.store.state(|s| s.phase.clone()).await
    }

    /// Wait until the flow is bypassed, granted, fails or is left
    ///
    /// Call after [`QueueFlow::start`]; an idle flow counts as left.
    ///
    /// # Errors
    ///
    /// - the flow's own [`FlowError`] if it failed
    /// - [`FlowError::Cancelled`] if it was left or disposed first
    /// - [`FlowError::QueueUnavailable`] if `timeout` elapses
    pub async fn wait_for_outcome(&self, timeout: Duration) -> Result<FlowOutcome, FlowError> {
        let settled = self
            .store
            .wait_for(
                |state| match &state.phase {
                    QueuePhase::Bypassed(reason) => Some(Ok(FlowOutcome::Bypassed(*reason))),
                    QueuePhase::Granted(grant) => Some(Ok(FlowOutcome::Granted(grant.clone()))),
                    QueuePhase::Failed(error) => Some(Err(error.clone())),
                    QueuePhase::Idle => Some(Err(FlowError::Cancelled)),
                    _ => None,
                },
                timeout,
            )
            .await;

        match settled {
            Ok(outcome) => outcome,
            Err(StoreError::ShutdownInProgress) => Err(FlowError::Cancelled),
            Err(StoreError::Timeout(waited)) => Err(FlowError::QueueUnavailable {
                reason: format!("no admission after {}s", waited.as_secs()),
            }),
        }
    }

    /// Actions produced by the flow's effects
    ///
    /// Presentation layers derive notifications from these ("you're next",
    /// "access granted", "queue unavailable").
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueAction> {
        self.store.subscribe_actions()
    }

    /// Whether the flow was disposed
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.store.is_shutdown()
    }
}

impl Drop for QueueFlow {
    fn drop(&mut self) {
        self.store.shutdown();
    }
}
