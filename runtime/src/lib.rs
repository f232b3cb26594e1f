//! # Turnstile Runtime
//!
//! Runtime implementation for the Turnstile architecture.
//!
//! This crate provides the Store runtime that coordinates reducer execution
//! and effect handling.
//!
//! ## Core Components
//!
//! - **Store**: The runtime that manages state and executes effects
//! - **Effect Executor**: Executes effect descriptions and feeds actions back to reducers
//! - **Cancellation Registry**: Owns the abort handles of cancellable effects (timers,
//!   in-flight requests). Each Store instance has its own registry; there is no global one.
//!
//! ## Example
//!
//! ```ignore
//! use turnstile_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action
//! store.send(Action::DoSomething).await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field).await;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::AbortHandle;
use turnstile_core::effect::{Effect, EffectId};
use turnstile_core::reducer::Reducer;

/// Retry logic with exponential backoff
pub mod retry;

/// Metric names and descriptions
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use std::time::Duration;
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// The store has been shut down and no longer accepts actions
        #[error("Store is shut down")]
        ShutdownInProgress,

        /// Waiting for a state condition took longer than allowed
        #[error("Timed out after {0:?} waiting for state")]
        Timeout(Duration),
    }
}

pub use error::StoreError;

/// A running cancellable effect.
struct Registration {
    token: u64,
    handle: AbortHandle,
}

type Registry = Arc<Mutex<HashMap<EffectId, Registration>>>;

/// Store module - the runtime that executes effects
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicU64, Duration, Effect, EffectId, Future, HashMap,
        Mutex, Notify, Ordering, Pin, PoisonError, Reducer, Registration, Registry, RwLock,
        StoreError,
    };
    use crate::metrics::{EFFECTS_CANCELLED, EFFECTS_EXECUTED, counter};
    use tokio::sync::broadcast;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (transition logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    /// 5. Cancellable effects, keyed by [`EffectId`]
    ///
    /// Cloning a Store yields another handle to the same state and registry.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        cancellables: Registry,
        next_token: Arc<AtomicU64>,
        changed: Arc<Notify>,
        /// Actions produced by effects are broadcast to observers here.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Clone + Send + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        ///
        /// The action broadcast channel holds 16 actions; use
        /// [`Store::with_broadcast_capacity`] for busier observers.
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(initial_state, reducer, environment, 16)
        }

        /// Create a new store with a custom action broadcast capacity
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                cancellables: Arc::new(Mutex::new(HashMap::new())),
                next_token: Arc::new(AtomicU64::new(0)),
                changed: Arc::new(Notify::new()),
                action_broadcast,
            }
        }

        /// Send an action to the store
        ///
        /// Runs the reducer under the state write lock, then starts every
        /// returned effect. Effects run in the background; actions they
        /// produce are fed back through `send`.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] once [`Store::shutdown`]
        /// has been called.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            if self.is_shutdown() {
                return Err(StoreError::ShutdownInProgress);
            }

            let effects = {
                let mut state = self.state.write().await;
                // Shutdown may have happened while we waited for the lock
                if self.is_shutdown() {
                    return Err(StoreError::ShutdownInProgress);
                }
                self.reducer.reduce(&mut state, action, &self.environment)
            };
            self.changed.notify_waiters();

            for effect in effects {
                self.execute_effect(effect);
            }
            Ok(())
        }

        /// Read state through a closure
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Wait until `f` returns `Some` for the current state
        ///
        /// `f` is evaluated once immediately and again after every reduced
        /// action.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`] if the condition does not hold within `timeout`
        /// - [`StoreError::ShutdownInProgress`] if the store shuts down first
        pub async fn wait_for<F, T>(&self, mut f: F, timeout: Duration) -> Result<T, StoreError>
        where
            F: FnMut(&S) -> Option<T>,
        {
            let deadline = tokio::time::Instant::now() + timeout;

            loop {
                // Register interest before checking, so a change between the
                // check and the await is not missed
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(value) = self.state(|s| f(s)).await {
                    return Ok(value);
                }
                if self.is_shutdown() {
                    return Err(StoreError::ShutdownInProgress);
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Err(StoreError::Timeout(timeout));
                }
            }
        }

        /// Subscribe to actions produced by effects
        ///
        /// Only feedback actions are broadcast, not the actions passed to
        /// [`Store::send`] directly.
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Stop accepting actions and abort every cancellable effect
        ///
        /// Idempotent. Non-cancellable effects already in flight finish, but
        /// the actions they produce are rejected.
        pub fn shutdown(&self) {
            let already = self.shutdown.swap(true, Ordering::SeqCst);

            let drained: Vec<(EffectId, Registration)> = self
                .cancellables
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain()
                .collect();

            for (id, registration) in drained {
                tracing::debug!(effect_id = %id, "Aborting cancellable effect on shutdown");
                registration.handle.abort();
                counter!(EFFECTS_CANCELLED).increment(1);
            }

            if !already {
                tracing::debug!("Store shut down");
            }
            self.changed.notify_waiters();
        }

        /// Whether [`Store::shutdown`] has been called
        #[must_use]
        pub fn is_shutdown(&self) -> bool {
            self.shutdown.load(Ordering::SeqCst)
        }

        /// Whether a cancellable effect is currently registered under `id`
        #[must_use]
        pub fn is_active(&self, id: EffectId) -> bool {
            self.cancellables
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&id)
        }

        /// Start an effect
        ///
        /// # Effect Types
        ///
        /// - `None`: No-op
        /// - `Future` / `Delay` / `Sequential`: Spawned, result actions fed back
        /// - `Parallel`: Each child started independently
        /// - `Cancellable`: Spawned and registered under its id
        /// - `Cancel`: Aborts the registered effect, if any
        fn execute_effect(&self, effect: Effect<A>) {
            match effect {
                Effect::None => {
                    tracing::trace!("Executing Effect::None (no-op)");
                    counter!(EFFECTS_EXECUTED, "type" => "none").increment(1);
                },
                Effect::Parallel(effects) => {
                    counter!(EFFECTS_EXECUTED, "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect);
                    }
                },
                Effect::Cancellable { id, effect } => self.spawn_cancellable(id, *effect),
                Effect::Cancel(id) => self.cancel(id),
                other => {
                    let store = self.clone();
                    tokio::spawn(async move {
                        store.run_effect(other).await;
                    });
                },
            }
        }

        /// Run an effect to completion on the current task
        fn run_effect(&self, effect: Effect<A>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                match effect {
                    Effect::None => {},
                    Effect::Future(fut) => {
                        counter!(EFFECTS_EXECUTED, "type" => "future").increment(1);
                        if let Some(action) = fut.await {
                            self.feed_back(action).await;
                        } else {
                            tracing::trace!("Effect::Future completed with no action");
                        }
                    },
                    Effect::Delay { duration, action } => {
                        counter!(EFFECTS_EXECUTED, "type" => "delay").increment(1);
                        tokio::time::sleep(duration).await;
                        tracing::trace!(?duration, "Effect::Delay elapsed, sending action");
                        self.feed_back(*action).await;
                    },
                    Effect::Sequential(effects) => {
                        counter!(EFFECTS_EXECUTED, "type" => "sequential")
                            .increment(1);
                        for effect in effects {
                            self.run_effect(effect).await;
                        }
                    },
                    Effect::Parallel(effects) => {
                        futures::future::join_all(
                            effects.into_iter().map(|effect| self.run_effect(effect)),
                        )
                        .await;
                    },
                    Effect::Cancellable { id, effect } => self.spawn_cancellable(id, *effect),
                    Effect::Cancel(id) => self.cancel(id),
                }
            })
        }

        /// Broadcast an effect-produced action and send it back to the reducer
        async fn feed_back(&self, action: A) {
            let _ = self.action_broadcast.send(action.clone());
            if let Err(error) = self.send(action).await {
                tracing::trace!(%error, "Dropping feedback action");
            }
        }

        fn spawn_cancellable(&self, id: EffectId, effect: Effect<A>) {
            if self.is_shutdown() {
                tracing::trace!(effect_id = %id, "Store shut down, not starting cancellable effect");
                return;
            }

            let token = self.next_token.fetch_add(1, Ordering::SeqCst);
            let store = self.clone();

            // Hold the registry while spawning so the task cannot release
            // itself before it is registered
            let mut registry = self
                .cancellables
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let handle = tokio::spawn(async move {
                store.run_effect(effect).await;
                store.release(id, token);
            });

            let previous = registry.insert(
                id,
                Registration {
                    token,
                    handle: handle.abort_handle(),
                },
            );
            drop(registry);

            if let Some(previous) = previous {
                tracing::trace!(effect_id = %id, "Replacing running cancellable effect");
                previous.handle.abort();
            }
        }

        /// Drop the registration for `id` if it still belongs to `token`
        fn release(&self, id: EffectId, token: u64) {
            let mut registry = self
                .cancellables
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if registry.get(&id).is_some_and(|r| r.token == token) {
                registry.remove(&id);
            }
        }

        fn cancel(&self, id: EffectId) {
            let removed = self
                .cancellables
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);

            match removed {
                Some(registration) => {
                    tracing::debug!(effect_id = %id, "Cancelling effect");
                    registration.handle.abort();
                    counter!(EFFECTS_CANCELLED).increment(1);
                },
                None => tracing::trace!(effect_id = %id, "Nothing to cancel"),
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                cancellables: Arc::clone(&self.cancellables),
                next_token: Arc::clone(&self.next_token),
                changed: Arc::clone(&self.changed),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

// Re-export for convenience
pub use store::Store;
