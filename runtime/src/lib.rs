//! # GateCheck Runtime
//!
//! Runtime implementation for GateCheck reducers.
//!
//! This crate provides the [`Store`](store::Store) that coordinates reducer execution
//! and effect handling:
//!
//! - **Store**: owns state, runs the reducer, executes the effects it returns
//! - **Feedback loop**: actions produced by effects are sent back through the reducer
//! - **Effect tracking**: [`EffectHandle`] lets callers wait for an action's effects to finish
//!
//! ## Example
//!
//! ```ignore
//! use gatecheck_runtime::Store;
//!
//! let store = Store::new(CheckpointState::default(), CheckpointReducer::new(), environment);
//!
//! let mut handle = store.send(CheckpointAction::CodeDecoded { raw }).await?;
//! handle.wait().await;
//!
//! let phase = store.state(|s| s.phase.clone()).await;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for effects or for a terminal action
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;
pub use store::Store;

/// Handle for waiting on the effects started by one `send()`.
///
/// Effects produced by an action run in spawned tasks. Actions fed back from those
/// effects are awaited by the same task, so waiting on the handle covers the whole
/// cascade that the original action triggered.
///
/// ```ignore
/// let mut handle = store.send(CheckpointAction::CodeDecoded { raw }).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// // Validation finished and its result has been reduced
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (handle, _tracking) = Self::new();
        handle
    }

    /// Number of effects still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Wait for all effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            // Sender dropped means every tracked effect has finished
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait for all effects to complete, giving up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if effects are still running when the timeout expires.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Internal counterpart of [`EffectHandle`], carried into effect tasks.
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Decrements the effect counter on drop, so a panicking effect still completes its handle.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        if self.0.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.0.notifier.send(());
        }
    }
}

/// Decrements the store-wide pending effect counter on drop.
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store module - The runtime for reducers
pub mod store {
    use super::{AtomicCounterGuard, DecrementGuard, EffectHandle, EffectTracking, StoreError};
    use gatecheck_core::{effect::Effect, reducer::Reducer};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, RwLock};

    /// The Store - runtime for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Every action produced by an effect is broadcast here before it is reduced.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        ///
        /// The action broadcast channel buffers 16 actions; use
        /// [`Store::with_broadcast_capacity`] for slower observers.
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(initial_state, reducer, environment, 16)
        }

        /// Create a new Store with custom action broadcast capacity
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
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Spawns the returned effects
        ///
        /// `send()` returns once the reducer has run, not when effects finish.
        /// Use the returned [`EffectHandle`] to wait for them.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            metrics::counter!("store.commands.total").increment(1);

            Ok(self.dispatch(action).await)
        }

        /// Reduce an action and spawn its effects, bypassing the shutdown gate.
        ///
        /// Effect feedback goes through here so that a drain started by
        /// [`Store::shutdown`] still reduces the actions of effects already running.
        async fn dispatch(&self, action: A) -> EffectHandle {
            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!("Reducer completed, returned {} effects", effects.len());
                effects
            };

            for effect in effects {
                self.execute_effect(effect, &tracking);
            }

            handle
        }

        /// Send an action and wait for a matching action produced by its effects
        ///
        /// Subscribes to the action broadcast before sending, so a fast effect cannot
        /// be missed.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: no matching action before the timeout
        /// - [`StoreError::ChannelClosed`]: broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to every action produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let admitted = store.state(|s| s.tally.admitted).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&state)
        }

        /// Initiate graceful shutdown of the store
        ///
        /// New actions are rejected immediately; running effects get `timeout` to finish,
        /// including the actions they feed back and the effects those start.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still running after `timeout`.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            self.shutdown.store(true, Ordering::Release);

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(25);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);
                if pending == 0 {
                    tracing::info!("All effects completed, shutdown successful");
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::error!(pending_effects = pending, "Shutdown timeout");
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Execute an effect with tracking
        ///
        /// `Effect::Future` runs in a spawned task. When it yields an action, the action is
        /// broadcast, sent back through the store, and its own effects are awaited before the
        /// task completes.
        fn execute_effect(&self, effect: Effect<A>, tracking: &EffectTracking) {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    tracking.increment();
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);

                    let guard = DecrementGuard(tracking.clone());
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        let _pending_guard = pending_guard;

                        let Some(action) = fut.await else {
                            tracing::trace!("Effect::Future completed with no action");
                            return;
                        };

                        let _ = store.action_broadcast.send(action.clone());

                        let mut child = store.dispatch(action).await;
                        child.wait().await;
                    });
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}
