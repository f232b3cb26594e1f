//! Integration tests for Store effect execution and cancellation
//!
//! Covers the guarantees the queue flow relies on: cancelling a timer stops
//! it, cancelling twice is harmless, shutdown aborts everything the store
//! owns, and `wait_for` wakes on state changes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use turnstile_core::effect::{Effect, EffectId};
use turnstile_core::reducer::Reducer;
use turnstile_core::{SmallVec, smallvec};
use turnstile_runtime::{Store, StoreError};

// ============================================================================
// Test Fixtures
// ============================================================================

const TICK: EffectId = EffectId::new("test.tick");

#[derive(Debug, Clone, PartialEq)]
enum TickAction {
    /// Start ticking every `every`
    Start { every: Duration },
    /// Timer fired
    Tick,
    /// Stop ticking
    Stop,
    /// Run a future that reports back
    Fetch,
    /// Result of `Fetch`
    Fetched(u32),
}

#[derive(Debug, Clone, Default)]
struct TickState {
    ticks: u32,
    every: Option<Duration>,
    fetched: Option<u32>,
}

#[derive(Clone)]
struct TickEnv {
    fetches: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct TickReducer;

fn schedule(every: Duration) -> Effect<TickAction> {
    Effect::Delay {
        duration: every,
        action: Box::new(TickAction::Tick),
    }
    .cancellable(TICK)
}

impl Reducer for TickReducer {
    type State = TickState;
    type Action = TickAction;
    type Environment = TickEnv;

    fn reduce(
        &self,
        state: &mut TickState,
        action: TickAction,
        env: &TickEnv,
    ) -> SmallVec<[Effect<TickAction>; 4]> {
        match action {
            TickAction::Start { every } => {
                state.every = Some(every);
                smallvec![schedule(every)]
            },
            TickAction::Tick => {
                state.ticks += 1;
                state
                    .every
                    .map_or_else(SmallVec::new, |every| smallvec![schedule(every)])
            },
            TickAction::Stop => {
                state.every = None;
                smallvec![Effect::Cancel(TICK)]
            },
            TickAction::Fetch => {
                let fetches = Arc::clone(&env.fetches);
                smallvec![Effect::future(async move {
                    let n = fetches.fetch_add(1, Ordering::SeqCst);
                    Some(TickAction::Fetched(u32::try_from(n).unwrap_or(u32::MAX) + 1))
                })]
            },
            TickAction::Fetched(n) => {
                state.fetched = Some(n);
                SmallVec::new()
            },
        }
    }
}

fn store() -> Store<TickState, TickAction, TickEnv, TickReducer> {
    Store::new(
        TickState::default(),
        TickReducer,
        TickEnv {
            fetches: Arc::new(AtomicUsize::new(0)),
        },
    )
}

async fn ticks(store: &Store<TickState, TickAction, TickEnv, TickReducer>) -> u32 {
    store.state(|s| s.ticks).await
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_timer_reschedules_itself() {
    let store = store();
    store
        .send(TickAction::Start {
            every: Duration::from_millis(2),
        })
        .await
        .unwrap();

    let reached = store
        .wait_for(|s| (s.ticks >= 3).then_some(s.ticks), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(reached >= 3);
    assert!(store.is_active(TICK));
}

#[tokio::test]
async fn test_cancel_stops_timer() {
    let store = store();
    store
        .send(TickAction::Start {
            every: Duration::from_millis(2),
        })
        .await
        .unwrap();
    store
        .wait_for(|s| (s.ticks >= 1).then_some(()), Duration::from_secs(2))
        .await
        .unwrap();

    store.send(TickAction::Stop).await.unwrap();
    let stopped_at = ticks(&store).await;
    assert!(!store.is_active(TICK));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(ticks(&store).await, stopped_at);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let store = store();
    assert_ok!(store.send(TickAction::Stop).await);
    assert_ok!(store.send(TickAction::Stop).await);
    assert!(!store.is_active(TICK));
}

#[tokio::test]
async fn test_rescheduling_replaces_running_timer() {
    let store = store();
    store
        .send(TickAction::Start {
            every: Duration::from_secs(60),
        })
        .await
        .unwrap();
    store
        .send(TickAction::Start {
            every: Duration::from_millis(2),
        })
        .await
        .unwrap();

    // Only the fast timer is left; the slow one was aborted
    store
        .wait_for(|s| (s.ticks >= 2).then_some(()), Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_future_result_is_fed_back_and_broadcast() {
    let store = store();
    let mut actions = store.subscribe_actions();

    store.send(TickAction::Fetch).await.unwrap();
    let fetched = store
        .wait_for(|s| s.fetched, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(fetched, 1);
    assert_eq!(actions.recv().await.unwrap(), TickAction::Fetched(1));
}

#[tokio::test]
async fn test_shutdown_aborts_timers_and_rejects_actions() {
    let store = store();
    store
        .send(TickAction::Start {
            every: Duration::from_millis(2),
        })
        .await
        .unwrap();

    store.shutdown();
    store.shutdown();
    let at_shutdown = ticks(&store).await;

    assert!(store.is_shutdown());
    assert!(!store.is_active(TICK));
    assert_eq!(
        store.send(TickAction::Tick).await,
        Err(StoreError::ShutdownInProgress)
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(ticks(&store).await, at_shutdown);
}

#[tokio::test]
async fn test_wait_for_times_out() {
    let store = store();
    let error = assert_err!(
        store
            .wait_for(|s| (s.ticks > 0).then_some(()), Duration::from_millis(20))
            .await
    );
    assert_eq!(error, StoreError::Timeout(Duration::from_millis(20)));
}

#[tokio::test]
async fn test_wait_for_wakes_on_shutdown() {
    let store = store();
    let waiter = store.clone();
    let handle = tokio::spawn(async move {
        waiter
            .wait_for(|s| (s.ticks > 0).then_some(()), Duration::from_secs(5))
            .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    store.shutdown();

    assert_eq!(handle.await.unwrap(), Err(StoreError::ShutdownInProgress));
}
