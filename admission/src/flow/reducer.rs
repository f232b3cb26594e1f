//! Reducer for the queue flow.

use crate::error::{FlowError, QueueError};
use crate::flow::{
    BypassReason, FlowSession, QueueAction, QueueEnvironment, QueueFlowState, QueuePhase,
};
use crate::types::{AccessGrant, JoinOutcome, PollOutcome, QueueMembership, QueueStatus};
use std::time::Duration;
use turnstile_core::effect::{Effect, EffectId};
use turnstile_core::reducer::Reducer;
use turnstile_core::{SmallVec, smallvec};
use turnstile_runtime::metrics::{FLOW_OUTCOMES, counter};

/// Queue status request
pub const STATUS_REQUEST: EffectId = EffectId::new("queue.status");
/// `join` request
pub const JOIN_REQUEST: EffectId = EffectId::new("queue.join");
/// Leave-then-join after a join conflict
pub const REJOIN_REQUEST: EffectId = EffectId::new("queue.rejoin");
/// Delay before retrying a failed join
pub const JOIN_BACKOFF: EffectId = EffectId::new("queue.join-backoff");
/// Delay before the next position poll
pub const POLL_TIMER: EffectId = EffectId::new("queue.poll-timer");
/// Position poll request
pub const POLL_REQUEST: EffectId = EffectId::new("queue.poll");
/// `claim-access` request
pub const CLAIM_REQUEST: EffectId = EffectId::new("queue.claim");

/// Every effect the flow can have running
pub const FLOW_EFFECTS: [EffectId; 7] = [
    POLL_TIMER,
    POLL_REQUEST,
    CLAIM_REQUEST,
    JOIN_BACKOFF,
    JOIN_REQUEST,
    REJOIN_REQUEST,
    STATUS_REQUEST,
];

type Effects = SmallVec<[Effect<QueueAction>; 4]>;

/// Reducer for one caller's queue flow.
///
/// Sequences status check → join → poll → claim, with retries, eviction
/// recovery and fail-open bypass. All network calls leave the reducer as
/// cancellable effects; `Leave` cancels every one of them before anything
/// else happens.
#[derive(Clone, Debug, Default)]
pub struct QueueReducer;

impl QueueReducer {
    /// Create a new queue reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for QueueReducer {
    type State = QueueFlowState;
    type Action = QueueAction;
    type Environment = QueueEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        if let Some(generation) = action.generation() {
            if generation != state.generation {
                tracing::trace!(
                    action = action.name(),
                    generation,
                    current = state.generation,
                    "Dropping result from an earlier generation"
                );
                return SmallVec::new();
            }
        }

        match action {
            QueueAction::StartFlow {
                show_id,
                caller_id,
                caller_info,
            } => {
                if !matches!(
                    state.phase,
                    QueuePhase::Idle | QueuePhase::Bypassed(_) | QueuePhase::Failed(_)
                ) {
                    tracing::debug!(phase = state.phase.name(), "Flow already running, ignoring start");
                    return SmallVec::new();
                }

                tracing::info!(
                    %show_id,
                    %caller_id,
                    generation = state.generation + 1,
                    "Queue flow started"
                );
                *state = QueueFlowState {
                    phase: QueuePhase::Checking,
                    session: Some(FlowSession {
                        show_id,
                        caller_id,
                        caller_info,
                    }),
                    generation: state.generation + 1,
                    poll_seq: state.poll_seq,
                    applied_seq: state.applied_seq,
                    ..QueueFlowState::default()
                };
                smallvec![request_status(state, env)]
            },

            QueueAction::StatusChecked { result, .. } => {
                if state.phase != QueuePhase::Checking {
                    return SmallVec::new();
                }
                on_status(state, env, result)
            },

            QueueAction::Joined { result, .. } => {
                if state.phase != QueuePhase::Joining {
                    return SmallVec::new();
                }
                on_joined(state, env, result)
            },

            QueueAction::RetryJoin { .. } => {
                if state.phase != QueuePhase::Joining {
                    return SmallVec::new();
                }
                smallvec![request_join(state, env, JOIN_REQUEST)]
            },

            QueueAction::PollTick { .. } => {
                if state.phase != QueuePhase::Waiting {
                    return SmallVec::new();
                }
                if state.poll_in_flight {
                    tracing::trace!(seq = state.poll_seq, "Poll still outstanding, skipping tick");
                    return SmallVec::new();
                }
                smallvec![request_position(state, env)]
            },

            QueueAction::PositionPolled { seq, result, .. } => {
                if seq != state.poll_seq {
                    tracing::trace!(seq, latest = state.poll_seq, "Dropping superseded poll");
                    return SmallVec::new();
                }
                state.poll_in_flight = false;
                if state.phase != QueuePhase::Waiting || seq <= state.applied_seq {
                    return SmallVec::new();
                }
                state.applied_seq = seq;
                on_polled(state, env, result)
            },

            QueueAction::AccessClaimed { result, .. } => {
                if state.phase != QueuePhase::Claiming {
                    return SmallVec::new();
                }
                on_claimed(state, env, result)
            },

            QueueAction::Leave => leave(state, env),
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

fn on_status(
    state: &mut QueueFlowState,
    env: &QueueEnvironment,
    result: Result<QueueStatus, QueueError>,
) -> Effects {
    let threshold = env.config().fast_pass_threshold;
    match result {
        Ok(status) if !status.is_open => bypass(state, BypassReason::QueueClosed),
        Ok(status) if status.queue_size < threshold => bypass(
            state,
            BypassReason::BelowThreshold {
                queue_size: status.queue_size,
            },
        ),
        Ok(status) => {
            tracing::debug!(queue_size = status.queue_size, "Queue active, joining");
            state.phase = QueuePhase::Joining;
            smallvec![request_join(state, env, JOIN_REQUEST)]
        },
        Err(error) => {
            tracing::warn!(%error, "Queue status check failed, proceeding without the queue");
            bypass(state, BypassReason::StatusUnavailable)
        },
    }
}

fn on_joined(
    state: &mut QueueFlowState,
    env: &QueueEnvironment,
    result: Result<JoinOutcome, QueueError>,
) -> Effects {
    match result {
        Ok(JoinOutcome::Granted(grant)) if !grant.is_valid_at(env.clock().now()) => retry_join(
            state,
            env,
            &format!("join returned a grant that expired at {}", grant.expires_at),
            None,
        ),
        Ok(JoinOutcome::Granted(grant)) => grant_access(state, env, grant),
        Ok(JoinOutcome::Queued(membership)) => {
            tracing::info!(
                position = membership.position.position,
                queue_size = membership.position.queue_size,
                "Joined queue"
            );
            state.join_retries = 0;
            enter_line(state, env, membership)
        },
        Err(QueueError::AlreadyQueued) if !state.conflict_retried => {
            tracing::warn!("Already queued, leaving and rejoining once");
            state.conflict_retried = true;
            smallvec![request_join(state, env, REJOIN_REQUEST)]
        },
        Err(QueueError::AlreadyQueued) => fail(state, FlowError::StuckMembership),
        Err(QueueError::Forbidden) => fail(state, FlowError::Forbidden),
        Err(error) => {
            let retry_after = match &error {
                QueueError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            retry_join(state, env, &error.to_string(), retry_after)
        },
    }
}

fn on_polled(
    state: &mut QueueFlowState,
    env: &QueueEnvironment,
    result: Result<PollOutcome, QueueError>,
) -> Effects {
    match result {
        Ok(PollOutcome::Granted(grant)) => grant_access(state, env, grant),
        Ok(PollOutcome::Waiting(position)) => {
            state.rate_limit_strikes = 0;
            let Some(membership) = state.membership.as_mut() else {
                tracing::warn!(
                    position = position.position,
                    "Polled without a known membership, rejoining"
                );
                state.phase = QueuePhase::Joining;
                return smallvec![request_join(state, env, JOIN_REQUEST)];
            };
            if position.position > membership.position.position {
                tracing::warn!(
                    previous = membership.position.position,
                    position = position.position,
                    "Queue position moved back"
                );
            }
            membership.update(position);
            tracing::debug!(
                seq = state.applied_seq,
                position = position.position,
                queue_size = position.queue_size,
                "Position updated"
            );
            if membership.at_front() {
                state.phase = QueuePhase::Claiming;
                smallvec![request_claim(state, env)]
            } else {
                smallvec![schedule_poll(state, env.config().next_poll_delay())]
            }
        },
        Err(QueueError::MembershipEvicted) => {
            state.rejoin_attempts += 1;
            state.membership = None;
            if state.rejoin_attempts > env.config().max_rejoin_attempts {
                return fail(
                    state,
                    FlowError::QueueUnavailable {
                        reason: "queue membership was lost repeatedly".to_string(),
                    },
                );
            }
            tracing::warn!(attempt = state.rejoin_attempts, "Queue membership lost, rejoining");
            state.phase = QueuePhase::Joining;
            state.conflict_retried = false;
            smallvec![request_join(state, env, JOIN_REQUEST)]
        },
        Err(QueueError::RateLimited { retry_after }) => rate_limited(state, env, retry_after),
        Err(QueueError::Forbidden) => fail(state, FlowError::Forbidden),
        Err(error) => {
            tracing::warn!(%error, "Position poll failed, continuing");
            smallvec![schedule_poll(state, env.config().next_poll_delay())]
        },
    }
}

fn on_claimed(
    state: &mut QueueFlowState,
    env: &QueueEnvironment,
    result: Result<AccessGrant, QueueError>,
) -> Effects {
    match result {
        Ok(grant) => grant_access(state, env, grant),
        Err(QueueError::Forbidden) => fail(state, FlowError::Forbidden),
        Err(QueueError::RateLimited { retry_after }) => {
            state.phase = QueuePhase::Waiting;
            rate_limited(state, env, retry_after)
        },
        Err(error) => {
            tracing::debug!(%error, "Claim failed, waiting for the next poll");
            state.phase = QueuePhase::Waiting;
            smallvec![schedule_poll(state, env.config().next_poll_delay())]
        },
    }
}

fn leave(state: &mut QueueFlowState, env: &QueueEnvironment) -> Effects {
    let mut effects: Effects = FLOW_EFFECTS.iter().map(|id| Effect::Cancel(*id)).collect();

    if let Some(session) = state.session.take() {
        if let Err(error) = env.grants().clear(&session.show_id) {
            tracing::warn!(%error, show_id = %session.show_id, "Failed to clear stored grant");
        }

        if state.phase.may_hold_membership() {
            let queue = env.queue();
            effects.push(Effect::future(async move {
                if let Err(error) = queue.leave(&session.show_id, &session.caller_id).await {
                    tracing::debug!(%error, show_id = %session.show_id, "Best-effort leave failed");
                }
                None
            }));
        }
        tracing::info!(from = state.phase.name(), "Left queue flow");
    }

    state.generation += 1;
    state.phase = QueuePhase::Idle;
    state.membership = None;
    state.poll_in_flight = false;
    effects
}

// ============================================================================
// Helpers
// ============================================================================

fn enter_line(
    state: &mut QueueFlowState,
    env: &QueueEnvironment,
    membership: QueueMembership,
) -> Effects {
    let at_front = membership.at_front();
    state.membership = Some(membership);
    if at_front {
        state.phase = QueuePhase::Claiming;
        smallvec![request_claim(state, env)]
    } else {
        state.phase = QueuePhase::Waiting;
        smallvec![schedule_poll(state, env.config().next_poll_delay())]
    }
}

fn grant_access(state: &mut QueueFlowState, env: &QueueEnvironment, grant: AccessGrant) -> Effects {
    let now = env.clock().now();
    if !grant.is_valid_at(now) {
        state.expired_grants += 1;
        if state.expired_grants > env.config().max_join_retries {
            return fail(
                state,
                FlowError::QueueUnavailable {
                    reason: "the queue keeps handing out expired access".to_string(),
                },
            );
        }
        tracing::warn!(
            expires_at = %grant.expires_at,
            strikes = state.expired_grants,
            "Received an already expired grant, waiting"
        );
        state.phase = QueuePhase::Waiting;
        return smallvec![schedule_poll(state, env.config().next_poll_delay())];
    }

    if let Err(error) = env.grants().save(&grant) {
        tracing::warn!(%error, "Failed to persist access grant");
    }
    tracing::info!(expires_at = %grant.expires_at, "Access granted");
    counter!(FLOW_OUTCOMES, "outcome" => "granted").increment(1);

    state.phase = QueuePhase::Granted(grant);
    state.poll_in_flight = false;
    smallvec![Effect::Cancel(POLL_TIMER), Effect::Cancel(POLL_REQUEST)]
}

/// Count a failed join and retry it after a backoff, or give up
fn retry_join(
    state: &mut QueueFlowState,
    env: &QueueEnvironment,
    reason: &str,
    retry_after: Option<Duration>,
) -> Effects {
    state.join_retries += 1;
    let config = env.config();
    if state.join_retries > config.max_join_retries {
        return fail(
            state,
            FlowError::QueueUnavailable {
                reason: format!("could not join the queue: {reason}"),
            },
        );
    }
    let delay = config.backoff_delay(state.join_retries, retry_after);
    tracing::warn!(
        reason,
        attempt = state.join_retries,
        delay_ms = millis(delay),
        "Join failed, retrying"
    );
    smallvec![
        Effect::Delay {
            duration: delay,
            action: Box::new(QueueAction::RetryJoin {
                generation: state.generation,
            }),
        }
        .cancellable(JOIN_BACKOFF)
    ]
}

fn bypass(state: &mut QueueFlowState, reason: BypassReason) -> Effects {
    tracing::info!(%reason, "Bypassing queue");
    counter!(FLOW_OUTCOMES, "outcome" => "bypassed").increment(1);
    state.phase = QueuePhase::Bypassed(reason);
    SmallVec::new()
}

fn fail(state: &mut QueueFlowState, error: FlowError) -> Effects {
    tracing::error!(%error, next_action = %error.next_action(), "Queue flow failed");
    counter!(FLOW_OUTCOMES, "outcome" => "failed").increment(1);
    state.phase = QueuePhase::Failed(error);
    state.poll_in_flight = false;
    smallvec![Effect::Cancel(POLL_TIMER)]
}

fn rate_limited(
    state: &mut QueueFlowState,
    env: &QueueEnvironment,
    retry_after: Option<Duration>,
) -> Effects {
    state.rate_limit_strikes += 1;
    let delay = env.config().backoff_delay(state.rate_limit_strikes, retry_after);
    tracing::warn!(
        strikes = state.rate_limit_strikes,
        delay_ms = millis(delay),
        "Rate limited, slowing down"
    );
    smallvec![schedule_poll(state, delay)]
}

fn schedule_poll(state: &QueueFlowState, delay: Duration) -> Effect<QueueAction> {
    Effect::Delay {
        duration: delay,
        action: Box::new(QueueAction::PollTick {
            generation: state.generation,
        }),
    }
    .cancellable(POLL_TIMER)
}

fn request_status(state: &QueueFlowState, env: &QueueEnvironment) -> Effect<QueueAction> {
    let Some(session) = state.session.clone() else {
        return Effect::None;
    };
    let queue = env.queue();
    let generation = state.generation;
    Effect::future(async move {
        let result = queue.status(&session.show_id).await;
        Some(QueueAction::StatusChecked { generation, result })
    })
    .cancellable(STATUS_REQUEST)
}

/// `join`, or under [`REJOIN_REQUEST`] a best-effort `leave` followed by `join`
fn request_join(state: &QueueFlowState, env: &QueueEnvironment, id: EffectId) -> Effect<QueueAction> {
    let Some(session) = state.session.clone() else {
        return Effect::None;
    };
    let queue = env.queue();
    let generation = state.generation;
    let leave_first = id == REJOIN_REQUEST;
    Effect::future(async move {
        if leave_first {
            if let Err(error) = queue.leave(&session.show_id, &session.caller_id).await {
                tracing::debug!(%error, "Leave before rejoin failed");
            }
        }
        let result = queue
            .join(&session.show_id, &session.caller_id, session.caller_info.as_ref())
            .await;
        Some(QueueAction::Joined { generation, result })
    })
    .cancellable(id)
}

fn request_position(state: &mut QueueFlowState, env: &QueueEnvironment) -> Effect<QueueAction> {
    let Some(session) = state.session.clone() else {
        return Effect::None;
    };
    state.poll_seq += 1;
    state.poll_in_flight = true;

    let queue = env.queue();
    let generation = state.generation;
    let seq = state.poll_seq;
    Effect::future(async move {
        let result = queue.position(&session.show_id, &session.caller_id).await;
        Some(QueueAction::PositionPolled {
            generation,
            seq,
            result,
        })
    })
    .cancellable(POLL_REQUEST)
}

fn request_claim(state: &QueueFlowState, env: &QueueEnvironment) -> Effect<QueueAction> {
    let Some(session) = state.session.clone() else {
        return Effect::None;
    };
    let queue = env.queue();
    let generation = state.generation;
    tracing::info!("At the front of the queue, claiming access");
    Effect::future(async move {
        let result = queue.claim_access(&session.show_id, &session.caller_id).await;
        Some(QueueAction::AccessClaimed { generation, result })
    })
    .cancellable(CLAIM_REQUEST)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
