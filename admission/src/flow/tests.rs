//! Unit tests for `QueueReducer`.
//!
//! These drive the reducer directly with a fixed clock and inspect the effect
//! descriptions it returns; nothing here touches the network or a runtime.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use super::reducer::{
    CLAIM_REQUEST, FLOW_EFFECTS, JOIN_BACKOFF, JOIN_REQUEST, POLL_REQUEST, POLL_TIMER,
    REJOIN_REQUEST, STATUS_REQUEST,
};
use super::*;
use crate::error::{FlowError, QueueError};
use crate::fakes::ScriptedQueueService;
use crate::grants::{GrantStore, InMemoryGrantStore};
use crate::types::{
    AccessGrant, AccessToken, CallerId, JoinOutcome, PollOutcome, QueueMembership, QueuePosition,
    QueueStatus, SessionId, ShowId,
};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use turnstile_core::effect::Effect;
use turnstile_core::reducer::Reducer;
use turnstile_runtime::retry::RetryPolicy;
use turnstile_testing::assertions::{
    assert_cancels, assert_has_cancellable, assert_has_future_effect, assert_no_effects,
    delayed_action,
};
use turnstile_testing::{ReducerTest, test_clock, test_epoch};

// ============================================================================
// Fixtures
// ============================================================================

fn config() -> FlowConfig {
    FlowConfig {
        fast_pass_threshold: 10,
        poll_interval: Duration::from_secs(5),
        poll_jitter: Duration::ZERO,
        max_rejoin_attempts: 2,
        max_join_retries: 2,
        backoff: RetryPolicy::builder()
            .initial_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(60))
            .multiplier(2.0)
            .build(),
    }
}

fn test_env() -> (QueueEnvironment, Arc<InMemoryGrantStore>) {
    let grants = Arc::new(InMemoryGrantStore::new());
    let env = QueueEnvironment::new(
        Arc::new(ScriptedQueueService::new()),
        grants.clone(),
        Arc::new(test_clock()),
        config(),
    );
    (env, grants)
}

fn show() -> ShowId {
    ShowId::new("S2")
}

fn start() -> QueueAction {
    QueueAction::StartFlow {
        show_id: show(),
        caller_id: CallerId::new("caller-1"),
        caller_info: None,
    }
}

fn grant(token: &str) -> AccessGrant {
    AccessGrant {
        show_id: show(),
        access_token: AccessToken::new(token),
        expires_at: test_epoch() + ChronoDuration::seconds(900),
    }
}

fn position(position: u32) -> QueuePosition {
    QueuePosition {
        position,
        queue_size: 200,
        estimated_wait_seconds: u64::from(position) * 10,
    }
}

fn membership(at: u32) -> QueueMembership {
    QueueMembership {
        show_id: show(),
        caller_id: CallerId::new("caller-1"),
        position: position(at),
        session_id: SessionId::new("sess-1"),
    }
}

fn open_queue(queue_size: u32) -> Result<QueueStatus, QueueError> {
    Ok(QueueStatus {
        is_open: true,
        queue_size,
    })
}

/// State after start → busy queue → joined at `at`
fn joined_state(env: &QueueEnvironment, at: u32) -> QueueFlowState {
    let reducer = QueueReducer::new();
    let mut state = QueueFlowState::new();
    reducer.reduce(&mut state, start(), env);
    reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(200),
        },
        env,
    );
    reducer.reduce(
        &mut state,
        QueueAction::Joined {
            generation: 1,
            result: Ok(JoinOutcome::Queued(membership(at))),
        },
        env,
    );
    state
}

/// Waiting state with a poll issued (seq 1 in flight)
fn polling_state(env: &QueueEnvironment, at: u32) -> QueueFlowState {
    let mut state = joined_state(env, at);
    QueueReducer::new().reduce(&mut state, QueueAction::PollTick { generation: 1 }, env);
    assert!(state.poll_in_flight);
    state
}

fn polled(seq: u64, result: Result<PollOutcome, QueueError>) -> QueueAction {
    QueueAction::PositionPolled {
        generation: 1,
        seq,
        result,
    }
}

fn tick_after(effects: &[Effect<QueueAction>]) -> Duration {
    let (duration, action) = delayed_action(effects).expect("a delayed action");
    assert_eq!(*action, QueueAction::PollTick { generation: 1 });
    *duration
}

// ============================================================================
// Checking
// ============================================================================

#[test]
fn test_start_checks_status() {
    let (env, _) = test_env();
    ReducerTest::new(QueueReducer::new())
        .with_env(env)
        .given_state(QueueFlowState::new())
        .when_action(start())
        .then_state(|state| {
            assert_eq!(state.phase, QueuePhase::Checking);
            assert_eq!(state.generation, 1);
            assert_eq!(state.session.as_ref().unwrap().show_id, show());
        })
        .then_effects(|effects| {
            assert_has_cancellable(effects, STATUS_REQUEST);
            assert_has_future_effect(effects);
        })
        .run();
}

#[test]
fn test_start_is_ignored_while_running() {
    let (env, _) = test_env();
    let state = joined_state(&env, 47);
    ReducerTest::new(QueueReducer::new())
        .with_env(env)
        .given_state(state)
        .when_action(start())
        .then_state(|state| {
            assert_eq!(state.phase, QueuePhase::Waiting);
            assert_eq!(state.generation, 1);
        })
        .then_effects(|effects| assert!(effects.is_empty()))
        .run();
}

#[test]
fn test_small_queue_bypasses_without_joining() {
    let (env, _) = test_env();
    ReducerTest::new(QueueReducer::new())
        .with_env(env)
        .given_state(QueueFlowState::new())
        .when_action(start())
        .when_action(QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(3),
        })
        .then_state(|state| {
            assert_eq!(
                state.phase,
                QueuePhase::Bypassed(BypassReason::BelowThreshold { queue_size: 3 })
            );
        })
        .then_effects(|effects| assert_no_effects(effects))
        .run();
}

#[test]
fn test_closed_queue_bypasses() {
    let (env, _) = test_env();
    ReducerTest::new(QueueReducer::new())
        .with_env(env)
        .given_state(QueueFlowState::new())
        .when_action(start())
        .when_action(QueueAction::StatusChecked {
            generation: 1,
            result: Ok(QueueStatus {
                is_open: false,
                queue_size: 5000,
            }),
        })
        .then_state(|state| {
            assert_eq!(state.phase, QueuePhase::Bypassed(BypassReason::QueueClosed));
        })
        .run();
}

#[test]
fn test_status_failure_fails_open() {
    let (env, _) = test_env();
    ReducerTest::new(QueueReducer::new())
        .with_env(env)
        .given_state(QueueFlowState::new())
        .when_action(start())
        .when_action(QueueAction::StatusChecked {
            generation: 1,
            result: Err(QueueError::TransientServer {
                status: 404,
                message: "no such endpoint".to_string(),
            }),
        })
        .then_state(|state| {
            assert_eq!(
                state.phase,
                QueuePhase::Bypassed(BypassReason::StatusUnavailable)
            );
        })
        .then_effects(|effects| assert_no_effects(effects))
        .run();
}

#[test]
fn test_busy_queue_joins() {
    let (env, _) = test_env();
    ReducerTest::new(QueueReducer::new())
        .with_env(env)
        .given_state(QueueFlowState::new())
        .when_action(start())
        .when_action(QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(10),
        })
        .then_state(|state| assert_eq!(state.phase, QueuePhase::Joining))
        .then_effects(|effects| assert_has_cancellable(effects, JOIN_REQUEST))
        .run();
}

// ============================================================================
// Joining
// ============================================================================

#[test]
fn test_joined_in_line_starts_polling() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = QueueFlowState::new();
    reducer.reduce(&mut state, start(), &env);
    reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(200),
        },
        &env,
    );

    let effects = reducer.reduce(
        &mut state,
        QueueAction::Joined {
            generation: 1,
            result: Ok(JoinOutcome::Queued(membership(47))),
        },
        &env,
    );

    assert_eq!(state.phase, QueuePhase::Waiting);
    assert_eq!(state.position(), Some(47));
    assert_has_cancellable(&effects, POLL_TIMER);
    assert_eq!(tick_after(&effects), Duration::from_secs(5));
}

#[test]
fn test_joined_at_front_claims_immediately() {
    let (env, _) = test_env();
    let state = joined_state(&env, 1);
    assert_eq!(state.phase, QueuePhase::Claiming);
    assert_eq!(state.position(), Some(1));
}

#[test]
fn test_join_with_token_is_granted_and_persisted() {
    let (env, grants) = test_env();
    let reducer = QueueReducer::new();
    let mut state = QueueFlowState::new();
    reducer.reduce(&mut state, start(), &env);
    reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(200),
        },
        &env,
    );

    reducer.reduce(
        &mut state,
        QueueAction::Joined {
            generation: 1,
            result: Ok(JoinOutcome::Granted(grant("direct"))),
        },
        &env,
    );

    assert_eq!(state.grant(), Some(&grant("direct")));
    let stored = grants.load(&show(), test_epoch()).unwrap().unwrap();
    assert_eq!(stored.access_token.expose(), "direct");
}

#[test]
fn test_join_conflict_rejoins_once_then_surfaces_stuck_membership() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = QueueFlowState::new();
    reducer.reduce(&mut state, start(), &env);
    reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(200),
        },
        &env,
    );

    let conflict = || QueueAction::Joined {
        generation: 1,
        result: Err(QueueError::AlreadyQueued),
    };

    let effects = reducer.reduce(&mut state, conflict(), &env);
    assert_eq!(state.phase, QueuePhase::Joining);
    assert!(state.conflict_retried);
    assert_has_cancellable(&effects, REJOIN_REQUEST);

    let effects = reducer.reduce(&mut state, conflict(), &env);
    assert_eq!(state.phase, QueuePhase::Failed(FlowError::StuckMembership));
    assert!(delayed_action(&effects).is_none());
    assert_eq!(
        FlowError::StuckMembership.next_action(),
        crate::error::NextAction::ContactSupport
    );
}

#[test]
fn test_transient_join_failures_back_off_then_give_up() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = QueueFlowState::new();
    reducer.reduce(&mut state, start(), &env);
    reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(200),
        },
        &env,
    );

    let failure = || QueueAction::Joined {
        generation: 1,
        result: Err(QueueError::TransientNetwork("connection reset".to_string())),
    };

    for expected in [Duration::from_secs(5), Duration::from_secs(10)] {
        let effects = reducer.reduce(&mut state, failure(), &env);
        assert_has_cancellable(&effects, JOIN_BACKOFF);
        let (delay, action) = delayed_action(&effects).unwrap();
        assert_eq!(*delay, expected);
        assert_eq!(*action, QueueAction::RetryJoin { generation: 1 });

        let effects = reducer.reduce(&mut state, QueueAction::RetryJoin { generation: 1 }, &env);
        assert_has_cancellable(&effects, JOIN_REQUEST);
    }

    reducer.reduce(&mut state, failure(), &env);
    assert!(matches!(
        state.phase,
        QueuePhase::Failed(FlowError::QueueUnavailable { .. })
    ));
}

#[test]
fn test_rate_limited_join_honours_retry_after() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = QueueFlowState::new();
    reducer.reduce(&mut state, start(), &env);
    reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(200),
        },
        &env,
    );

    let effects = reducer.reduce(
        &mut state,
        QueueAction::Joined {
            generation: 1,
            result: Err(QueueError::RateLimited {
                retry_after: Some(Duration::from_secs(42)),
            }),
        },
        &env,
    );

    let (delay, _) = delayed_action(&effects).unwrap();
    assert_eq!(*delay, Duration::from_secs(42));
}

#[test]
fn test_forbidden_join_is_terminal() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = QueueFlowState::new();
    reducer.reduce(&mut state, start(), &env);
    reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(200),
        },
        &env,
    );
    reducer.reduce(
        &mut state,
        QueueAction::Joined {
            generation: 1,
            result: Err(QueueError::Forbidden),
        },
        &env,
    );
    assert_eq!(state.phase, QueuePhase::Failed(FlowError::Forbidden));
}

// ============================================================================
// Waiting
// ============================================================================

#[test]
fn test_tick_issues_one_poll_at_a_time() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = joined_state(&env, 47);

    let effects = reducer.reduce(&mut state, QueueAction::PollTick { generation: 1 }, &env);
    assert_has_cancellable(&effects, POLL_REQUEST);
    assert_eq!(state.poll_seq, 1);
    assert!(state.poll_in_flight);

    let effects = reducer.reduce(&mut state, QueueAction::PollTick { generation: 1 }, &env);
    assert!(effects.is_empty());
    assert_eq!(state.poll_seq, 1);
}

#[test]
fn test_poll_applies_position_and_schedules_next_tick() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 47);

    let effects = reducer.reduce(
        &mut state,
        polled(1, Ok(PollOutcome::Waiting(position(45)))),
        &env,
    );

    assert_eq!(state.position(), Some(45));
    assert_eq!(state.applied_seq, 1);
    assert!(!state.poll_in_flight);
    assert_eq!(tick_after(&effects), Duration::from_secs(5));
}

#[test]
fn test_superseded_and_duplicate_polls_are_dropped() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 47);
    reducer.reduce(&mut state, polled(1, Ok(PollOutcome::Waiting(position(40)))), &env);
    reducer.reduce(&mut state, QueueAction::PollTick { generation: 1 }, &env);
    assert_eq!(state.poll_seq, 2);

    // A late answer to poll 1 arrives while poll 2 is outstanding
    let effects = reducer.reduce(&mut state, polled(1, Ok(PollOutcome::Waiting(position(45)))), &env);
    assert!(effects.is_empty());
    assert_eq!(state.position(), Some(40));
    assert!(state.poll_in_flight);

    reducer.reduce(&mut state, polled(2, Ok(PollOutcome::Waiting(position(30)))), &env);
    assert_eq!(state.position(), Some(30));

    // Replayed answer to poll 2
    let effects = reducer.reduce(&mut state, polled(2, Ok(PollOutcome::Waiting(position(35)))), &env);
    assert!(effects.is_empty());
    assert_eq!(state.position(), Some(30));
}

#[test]
fn test_position_one_without_token_claims() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 2);

    let effects = reducer.reduce(&mut state, polled(1, Ok(PollOutcome::Waiting(position(1)))), &env);

    assert_eq!(state.phase, QueuePhase::Claiming);
    assert_has_cancellable(&effects, CLAIM_REQUEST);
    assert!(delayed_action(&effects).is_none());
}

#[test]
fn test_poll_with_grant_stops_polling() {
    let (env, grants) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 2);

    let effects = reducer.reduce(&mut state, polled(1, Ok(PollOutcome::Granted(grant("auto")))), &env);

    assert_eq!(state.grant(), Some(&grant("auto")));
    assert_cancels(&effects, POLL_TIMER);
    assert!(delayed_action(&effects).is_none());
    assert!(grants.load(&show(), test_epoch()).unwrap().is_some());
}

#[test]
fn test_eviction_rejoins_then_gives_up() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 20);

    for attempt in 1..=2 {
        let seq = state.poll_seq;
        let effects = reducer.reduce(&mut state, polled(seq, Err(QueueError::MembershipEvicted)), &env);
        assert_eq!(state.phase, QueuePhase::Joining);
        assert_eq!(state.rejoin_attempts, attempt);
        assert!(state.membership.is_none());
        assert_has_cancellable(&effects, JOIN_REQUEST);

        reducer.reduce(
            &mut state,
            QueueAction::Joined {
                generation: 1,
                result: Ok(JoinOutcome::Queued(membership(20))),
            },
            &env,
        );
        reducer.reduce(&mut state, QueueAction::PollTick { generation: 1 }, &env);
    }

    let seq = state.poll_seq;
    reducer.reduce(&mut state, polled(seq, Err(QueueError::MembershipEvicted)), &env);
    assert!(matches!(
        state.phase,
        QueuePhase::Failed(FlowError::QueueUnavailable { .. })
    ));
}

#[test]
fn test_rate_limited_poll_backs_off() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 20);

    let effects = reducer.reduce(
        &mut state,
        polled(1, Err(QueueError::RateLimited { retry_after: None })),
        &env,
    );
    assert_eq!(tick_after(&effects), Duration::from_secs(5));

    reducer.reduce(&mut state, QueueAction::PollTick { generation: 1 }, &env);
    let effects = reducer.reduce(
        &mut state,
        polled(2, Err(QueueError::RateLimited { retry_after: None })),
        &env,
    );
    assert_eq!(state.rate_limit_strikes, 2);
    assert_eq!(tick_after(&effects), Duration::from_secs(10));

    // A successful poll resets the backoff
    reducer.reduce(&mut state, QueueAction::PollTick { generation: 1 }, &env);
    let effects = reducer.reduce(&mut state, polled(3, Ok(PollOutcome::Waiting(position(19)))), &env);
    assert_eq!(state.rate_limit_strikes, 0);
    assert_eq!(tick_after(&effects), Duration::from_secs(5));
}

#[test]
fn test_transient_poll_failure_keeps_polling() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 20);

    let effects = reducer.reduce(
        &mut state,
        polled(
            1,
            Err(QueueError::TransientServer {
                status: 502,
                message: "bad gateway".to_string(),
            }),
        ),
        &env,
    );

    assert_eq!(state.phase, QueuePhase::Waiting);
    assert_eq!(state.position(), Some(20));
    assert_has_cancellable(&effects, POLL_TIMER);
}

// ============================================================================
// Claiming
// ============================================================================

#[test]
fn test_claim_race_returns_to_waiting() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = joined_state(&env, 1);

    let effects = reducer.reduce(
        &mut state,
        QueueAction::AccessClaimed {
            generation: 1,
            result: Err(QueueError::ClaimRace),
        },
        &env,
    );

    assert_eq!(state.phase, QueuePhase::Waiting);
    assert_eq!(tick_after(&effects), Duration::from_secs(5));
}

#[test]
fn test_claim_success_grants() {
    let (env, grants) = test_env();
    let reducer = QueueReducer::new();
    let mut state = joined_state(&env, 1);

    reducer.reduce(
        &mut state,
        QueueAction::AccessClaimed {
            generation: 1,
            result: Ok(grant("abc")),
        },
        &env,
    );

    assert_eq!(state.grant(), Some(&grant("abc")));
    assert_eq!(
        grants.load(&show(), test_epoch()).unwrap(),
        Some(grant("abc"))
    );
}

#[test]
fn test_expired_grant_is_not_accepted() {
    let (env, grants) = test_env();
    let reducer = QueueReducer::new();
    let mut state = joined_state(&env, 1);

    let mut stale = grant("stale");
    stale.expires_at = test_epoch();
    let effects = reducer.reduce(
        &mut state,
        QueueAction::AccessClaimed {
            generation: 1,
            result: Ok(stale),
        },
        &env,
    );

    assert_eq!(state.phase, QueuePhase::Waiting);
    assert_has_cancellable(&effects, POLL_TIMER);
    assert!(grants.is_empty());
}

fn stale_grant() -> AccessGrant {
    let mut stale = grant("stale");
    stale.expires_at = test_epoch() - ChronoDuration::seconds(1);
    stale
}

#[test]
fn test_repeated_expired_claims_give_up() {
    let (env, grants) = test_env();
    let reducer = QueueReducer::new();
    let mut state = joined_state(&env, 1);

    for strike in 1..=2 {
        reducer.reduce(
            &mut state,
            QueueAction::AccessClaimed {
                generation: 1,
                result: Ok(stale_grant()),
            },
            &env,
        );
        assert_eq!(state.phase, QueuePhase::Waiting);
        assert_eq!(state.expired_grants, strike);

        reducer.reduce(&mut state, QueueAction::PollTick { generation: 1 }, &env);
        let seq = state.poll_seq;
        reducer.reduce(&mut state, polled(seq, Ok(PollOutcome::Waiting(position(1)))), &env);
        assert_eq!(state.phase, QueuePhase::Claiming);
    }

    reducer.reduce(
        &mut state,
        QueueAction::AccessClaimed {
            generation: 1,
            result: Ok(stale_grant()),
        },
        &env,
    );
    assert!(matches!(
        state.phase,
        QueuePhase::Failed(FlowError::QueueUnavailable { .. })
    ));
    assert!(grants.is_empty());
}

#[test]
fn test_expired_grant_on_join_backs_off_and_rejoins() {
    let (env, grants) = test_env();
    let reducer = QueueReducer::new();
    let mut state = QueueFlowState::new();
    reducer.reduce(&mut state, start(), &env);
    reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(200),
        },
        &env,
    );

    let expired_join = || QueueAction::Joined {
        generation: 1,
        result: Ok(JoinOutcome::Granted(stale_grant())),
    };

    for expected in [Duration::from_secs(5), Duration::from_secs(10)] {
        let effects = reducer.reduce(&mut state, expired_join(), &env);
        assert_eq!(state.phase, QueuePhase::Joining);
        assert_has_cancellable(&effects, JOIN_BACKOFF);
        let (delay, action) = delayed_action(&effects).unwrap();
        assert_eq!(*delay, expected);
        assert_eq!(*action, QueueAction::RetryJoin { generation: 1 });

        let effects = reducer.reduce(&mut state, QueueAction::RetryJoin { generation: 1 }, &env);
        assert_has_cancellable(&effects, JOIN_REQUEST);
    }

    reducer.reduce(&mut state, expired_join(), &env);
    assert!(matches!(
        state.phase,
        QueuePhase::Failed(FlowError::QueueUnavailable { .. })
    ));
    assert!(grants.is_empty());
}

#[test]
fn test_expired_grant_on_poll_keeps_polling_then_gives_up() {
    let (env, grants) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 20);

    for strike in 1..=2 {
        let seq = state.poll_seq;
        let effects = reducer.reduce(
            &mut state,
            polled(seq, Ok(PollOutcome::Granted(stale_grant()))),
            &env,
        );
        assert_eq!(state.phase, QueuePhase::Waiting);
        assert_eq!(state.expired_grants, strike);
        assert_eq!(tick_after(&effects), Duration::from_secs(5));
        reducer.reduce(&mut state, QueueAction::PollTick { generation: 1 }, &env);
    }

    let seq = state.poll_seq;
    reducer.reduce(
        &mut state,
        polled(seq, Ok(PollOutcome::Granted(stale_grant()))),
        &env,
    );
    assert!(matches!(
        state.phase,
        QueuePhase::Failed(FlowError::QueueUnavailable { .. })
    ));
    assert!(grants.is_empty());
}

#[test]
fn test_poll_without_membership_rejoins() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 20);
    state.membership = None;

    let effects = reducer.reduce(&mut state, polled(1, Ok(PollOutcome::Waiting(position(1)))), &env);

    assert_eq!(state.phase, QueuePhase::Joining);
    assert_has_cancellable(&effects, JOIN_REQUEST);
}

#[test]
fn test_new_grant_replaces_previous_for_show() {
    let (env, grants) = test_env();
    grants.save(&grant("older")).unwrap();

    let reducer = QueueReducer::new();
    let mut state = joined_state(&env, 1);
    reducer.reduce(
        &mut state,
        QueueAction::AccessClaimed {
            generation: 1,
            result: Ok(grant("newer")),
        },
        &env,
    );

    assert_eq!(grants.len(), 1);
    let stored = grants.load(&show(), test_epoch()).unwrap().unwrap();
    assert_eq!(stored.access_token.expose(), "newer");
}

// ============================================================================
// Leave
// ============================================================================

#[test]
fn test_leave_cancels_everything_and_notifies_server() {
    let (env, grants) = test_env();
    grants.save(&grant("abc")).unwrap();
    let state = polling_state(&env, 20);

    ReducerTest::new(QueueReducer::new())
        .with_env(env)
        .given_state(state)
        .when_action(QueueAction::Leave)
        .then_state(|state| {
            assert_eq!(state.phase, QueuePhase::Idle);
            assert_eq!(state.generation, 2);
            assert!(state.session.is_none());
            assert!(!state.poll_in_flight);
        })
        .then_effects(|effects| {
            for id in FLOW_EFFECTS {
                assert_cancels(effects, id);
            }
            // Cancels come before the server notification
            assert!(matches!(effects[0], Effect::Cancel(_)));
            assert!(matches!(effects.last(), Some(Effect::Future(_))));
        })
        .run();

    assert!(grants.is_empty());
}

#[test]
fn test_leave_is_idempotent() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = joined_state(&env, 20);

    reducer.reduce(&mut state, QueueAction::Leave, &env);
    let effects = reducer.reduce(&mut state, QueueAction::Leave, &env);

    assert_eq!(state.phase, QueuePhase::Idle);
    assert_eq!(effects.len(), FLOW_EFFECTS.len());
    assert!(effects.iter().all(|e| matches!(e, Effect::Cancel(_))));
}

#[test]
fn test_results_after_leave_are_ignored() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = polling_state(&env, 20);
    reducer.reduce(&mut state, QueueAction::Leave, &env);

    let effects = reducer.reduce(&mut state, polled(1, Ok(PollOutcome::Granted(grant("late")))), &env);
    assert!(effects.is_empty());
    assert_eq!(state.phase, QueuePhase::Idle);

    let effects = reducer.reduce(&mut state, QueueAction::PollTick { generation: 1 }, &env);
    assert!(effects.is_empty());
}

#[test]
fn test_leave_after_bypass_does_not_notify_server() {
    let (env, _) = test_env();
    ReducerTest::new(QueueReducer::new())
        .with_env(env)
        .given_state(QueueFlowState::new())
        .when_action(start())
        .when_action(QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(1),
        })
        .when_action(QueueAction::Leave)
        .then_effects(|effects| {
            assert!(effects.iter().all(|e| matches!(e, Effect::Cancel(_))));
        })
        .run();
}

#[test]
fn test_restart_after_failure_uses_new_generation() {
    let (env, _) = test_env();
    let reducer = QueueReducer::new();
    let mut state = QueueFlowState::new();
    reducer.reduce(&mut state, start(), &env);
    reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(200),
        },
        &env,
    );
    reducer.reduce(
        &mut state,
        QueueAction::Joined {
            generation: 1,
            result: Err(QueueError::Forbidden),
        },
        &env,
    );

    reducer.reduce(&mut state, start(), &env);
    assert_eq!(state.phase, QueuePhase::Checking);
    assert_eq!(state.generation, 2);
    assert!(!state.conflict_retried);

    // The old generation's status answer must not move the new flow
    let effects = reducer.reduce(
        &mut state,
        QueueAction::StatusChecked {
            generation: 1,
            result: open_queue(1),
        },
        &env,
    );
    assert!(effects.is_empty());
    assert_eq!(state.phase, QueuePhase::Checking);
}
